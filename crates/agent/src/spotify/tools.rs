//! search_tracks, create_playlist, add_tracks_to_playlist

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::SpotifyClient;
use crate::tools::{RegistryError, ToolDefinition, ToolError, ToolHandler, ToolRegistry};

const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// Track summary returned to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub duration_ms: u64,
}

/// Created playlist returned to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistDescriptor {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub description: String,
    pub public: bool,
    pub collaborative: bool,
    pub url: Option<String>,
}

// Spotify payloads, only the fields we read

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Paging<Track>,
}

#[derive(Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct Track {
    id: String,
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<Named>,
    album: Option<Named>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Playlist {
    id: String,
    uri: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: Option<bool>,
    #[serde(default)]
    collaborative: bool,
    #[serde(default)]
    external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Deserialize)]
struct SnapshotResponse {
    snapshot_id: String,
}

impl From<Track> for TrackDescriptor {
    fn from(track: Track) -> Self {
        Self {
            id: track.id,
            uri: track.uri,
            name: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            album: track.album.map(|a| a.name).unwrap_or_default(),
            duration_ms: track.duration_ms,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, ToolError> {
    serde_json::from_value(value)
        .map_err(|e| ToolError::failed(format!("unexpected {what} response: {e}")))
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::failed(format!("bad arguments: {e}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::failed(e.to_string()))
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    limit: Option<u32>,
}

pub struct SearchTracks {
    client: Arc<SpotifyClient>,
}

impl SearchTracks {
    pub fn new(client: Arc<SpotifyClient>) -> Self {
        Self { client }
    }

    pub fn definition(client: Arc<SpotifyClient>) -> ToolDefinition {
        ToolDefinition::new(
            "search_tracks",
            "Search Spotify for tracks. Returns id, uri, name, artists, album and duration for each match.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1, "description": "Search text, e.g. artist, genre or track name" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 50, "description": "Number of tracks to return (default 5)" }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            Self::new(client),
        )
        .idempotent(true)
    }
}

#[async_trait]
impl ToolHandler for SearchTracks {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(args)?;
        let limit = args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        debug!("search_tracks: {} (limit {})", args.query, limit);

        let response = self
            .client
            .get(
                &["search"],
                &[
                    ("q", args.query),
                    ("type", "track".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let found: SearchResponse = decode(response, "search")?;
        let tracks: Vec<TrackDescriptor> = found
            .tracks
            .items
            .into_iter()
            .map(TrackDescriptor::from)
            .collect();
        to_value(&tracks)
    }
}

fn default_public() -> bool {
    true
}

#[derive(Deserialize)]
struct CreatePlaylistArgs {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_public")]
    public: bool,
    #[serde(default)]
    collaborative: bool,
}

pub struct CreatePlaylist {
    client: Arc<SpotifyClient>,
}

impl CreatePlaylist {
    pub fn new(client: Arc<SpotifyClient>) -> Self {
        Self { client }
    }

    pub fn definition(client: Arc<SpotifyClient>) -> ToolDefinition {
        ToolDefinition::new(
            "create_playlist",
            "Create a new playlist in the user's Spotify account and return its id and uri.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1, "description": "Playlist name" },
                    "description": { "type": "string", "description": "Playlist description" },
                    "public": { "type": "boolean", "description": "Visible on the user's profile (default true)" },
                    "collaborative": { "type": "boolean", "description": "Others may edit (default false)" }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
            Self::new(client),
        )
    }
}

#[async_trait]
impl ToolHandler for CreatePlaylist {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: CreatePlaylistArgs = parse_args(args)?;
        let token = self.client.token().await?;
        let user_id = token
            .user_id
            .ok_or_else(|| ToolError::Auth("no Spotify user id for this session".to_string()))?;

        let response = self
            .client
            .post(
                &["users", user_id.as_str(), "playlists"],
                &json!({
                    "name": args.name,
                    "description": args.description,
                    "public": args.public,
                    "collaborative": args.collaborative,
                }),
            )
            .await?;
        let playlist: Playlist = decode(response, "create playlist")?;
        info!("created playlist {} ({})", playlist.name, playlist.id);

        to_value(&PlaylistDescriptor {
            id: playlist.id,
            uri: playlist.uri,
            name: playlist.name,
            description: playlist.description.unwrap_or_default(),
            public: playlist.public.unwrap_or(args.public),
            collaborative: playlist.collaborative,
            url: playlist.external_urls.and_then(|u| u.spotify),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTracksArgs {
    playlist_id: String,
    track_uris: Vec<String>,
}

pub struct AddTracksToPlaylist {
    client: Arc<SpotifyClient>,
}

impl AddTracksToPlaylist {
    pub fn new(client: Arc<SpotifyClient>) -> Self {
        Self { client }
    }

    pub fn definition(client: Arc<SpotifyClient>) -> ToolDefinition {
        ToolDefinition::new(
            "add_tracks_to_playlist",
            "Add tracks (by Spotify URI) to an existing playlist.",
            json!({
                "type": "object",
                "properties": {
                    "playlistId": { "type": "string", "minLength": 1, "description": "Playlist id returned by create_playlist" },
                    "trackUris": {
                        "type": "array",
                        "items": { "type": "string", "minLength": 1 },
                        "minItems": 1,
                        "maxItems": 100,
                        "description": "Track URIs such as spotify:track:4uLU6hMCjMI75M1A2tKUQC"
                    }
                },
                "required": ["playlistId", "trackUris"],
                "additionalProperties": false
            }),
            Self::new(client),
        )
    }
}

#[async_trait]
impl ToolHandler for AddTracksToPlaylist {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: AddTracksArgs = parse_args(args)?;
        let added = args.track_uris.len();

        let response = self
            .client
            .post(
                &["playlists", args.playlist_id.as_str(), "tracks"],
                &json!({ "uris": args.track_uris }),
            )
            .await?;
        let snapshot: SnapshotResponse = decode(response, "add tracks")?;
        info!("added {} tracks to {}", added, args.playlist_id);

        Ok(json!({
            "playlistId": args.playlist_id,
            "snapshotId": snapshot.snapshot_id,
            "added": added,
        }))
    }
}

/// Register the three playlist tools against one client
pub fn register_spotify_tools(
    registry: &mut ToolRegistry,
    client: Arc<SpotifyClient>,
) -> Result<(), RegistryError> {
    registry.register(SearchTracks::definition(client.clone()))?;
    registry.register(CreatePlaylist::definition(client.clone()))?;
    registry.register(AddTracksToPlaylist::definition(client))?;
    Ok(())
}
