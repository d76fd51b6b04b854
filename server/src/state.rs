use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::attachments::{AttachmentRouter, FsObjectStore};
use crate::config::Config;
use crate::db::DbPool;
use crate::notify::NotificationEngine;
use crate::store::{ChatStore, SqliteStore};
use crate::ws::{Dispatcher, SessionRegistry};

/// Upload staging settings used by the multipart handlers.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

/// A blob directory exposed under a public URL prefix.
#[derive(Debug, Clone)]
pub struct MediaMount {
    pub public_url: String,
    pub dir: PathBuf,
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Persistent store for users, chats, messages and notification lists
    pub store: Arc<dyn ChatStore>,
    /// Notification consistency engine
    pub engine: NotificationEngine,
    /// Live connections and their user/chat bindings
    pub sessions: Arc<SessionRegistry>,
    /// Per-user event delivery over the session registry
    pub dispatcher: Dispatcher,
    /// Image and file blob stores
    pub attachments: AttachmentRouter,
    /// JWT verification secret (HS256)
    pub jwt_secret: Vec<u8>,
    pub uploads: UploadSettings,
    /// Picture URL for groups created without one
    pub default_group_picture: String,
    /// Picture URL restored when a profile picture is removed
    pub default_user_picture: String,
    /// How long a socket may go without a pong
    pub ping_timeout: Duration,
    /// Blob directories served as static files
    pub media: Vec<MediaMount>,
    /// Allowed CORS origin; empty allows any
    pub client_origin: String,
}

impl AppState {
    /// Wire the store, blob stores, engine and session registry together.
    pub fn new(db: DbPool, config: &Config) -> Self {
        let storage = config.storage();
        let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::new(db));
        let attachments = AttachmentRouter::new(
            Arc::new(FsObjectStore::new(
                &storage.images_dir,
                storage.images_public_url.as_str(),
            )),
            Arc::new(FsObjectStore::new(
                &storage.files_dir,
                storage.files_public_url.as_str(),
            )),
        );
        let engine = NotificationEngine::new(store.clone(), attachments.clone());
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(sessions.clone());

        Self {
            store,
            engine,
            sessions,
            dispatcher,
            attachments,
            jwt_secret: config.jwt_secret.as_bytes().to_vec(),
            uploads: UploadSettings {
                dir: PathBuf::from(&storage.upload_dir),
                max_bytes: storage.max_upload_bytes(),
            },
            default_group_picture: storage.default_group_picture.clone(),
            default_user_picture: storage.default_user_picture.clone(),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
            media: vec![
                MediaMount {
                    public_url: storage.images_public_url.clone(),
                    dir: PathBuf::from(&storage.images_dir),
                },
                MediaMount {
                    public_url: storage.files_public_url.clone(),
                    dir: PathBuf::from(&storage.files_dir),
                },
            ],
            client_origin: config.client_origin.clone(),
        }
    }
}
