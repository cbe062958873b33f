//! Telegram channel uploads: queue, captions, upload profiles and the worker.

pub mod bot;
pub mod caption;
pub mod profile;
pub mod queue;
pub mod uploader;

pub use bot::{create_bot, BotSender};
pub use queue::{ItemKind, QueueOutcome, UploadItem, UploadQueue};
pub use uploader::{
    upload_priority, ChannelSender, SendRequest, TelegramStatus, TelegramUploader, UploadError, UploaderSettings,
};
