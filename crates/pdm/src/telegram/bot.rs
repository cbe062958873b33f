//! teloxide-backed [`ChannelSender`].

use async_trait::async_trait;
use pdmcore::config;
use pdmcore::storage::db::TelegramInfo;
use reqwest::ClientBuilder;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode, Recipient};
use teloxide::RequestError;

use super::profile::UploadMethod;
use super::uploader::{ChannelSender, SendRequest, UploadError};

/// Above the slowest upload profile so the profile timeout fires first.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(330);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a Bot with long upload timeouts and an optional custom API URL
///
/// # Returns
/// * `Ok(Bot)` - Bot ready to use
/// * `Err(anyhow::Error)` - HTTP client could not be built or the API URL is invalid
pub fn create_bot(token: &str) -> anyhow::Result<Bot> {
    let client = ClientBuilder::new()
        .timeout(CLIENT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let bot = Bot::with_client(token, client);

    match config::telegram::API_URL.as_deref() {
        Some(raw) => {
            let url = url::Url::parse(raw).map_err(|e| anyhow::anyhow!("Invalid TELEGRAM_API_URL: {}", e))?;
            log::info!("Using custom Bot API URL: {}", url);
            Ok(bot.set_api_url(url))
        }
        None => Ok(bot),
    }
}

/// Numeric ids become chat ids, anything else a channel username.
pub fn parse_channel(raw: &str) -> Recipient {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if raw.starts_with('@') => Recipient::ChannelUsername(raw.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{}", raw)),
    }
}

/// Public link to a channel post.
///
/// `@name` channels get `t.me/name/<id>`, private `-100…` channels get
/// `t.me/c/<internal id>/<id>`. Other chat ids have no link.
pub fn share_link(channel: &str, message_id: i64) -> Option<String> {
    let channel = channel.trim();
    if let Ok(id) = channel.parse::<i64>() {
        let internal = id.to_string().strip_prefix("-100")?.to_string();
        return Some(format!("https://t.me/c/{}/{}", internal, message_id));
    }
    let name = channel.trim_start_matches('@');
    (!name.is_empty()).then(|| format!("https://t.me/{}/{}", name, message_id))
}

fn classify(err: RequestError) -> UploadError {
    match err {
        RequestError::RetryAfter(seconds) => UploadError::RateLimited(seconds.duration()),
        RequestError::Network(e) if e.is_timeout() => UploadError::Timeout,
        RequestError::Network(e) => UploadError::Network(e.to_string()),
        RequestError::Api(api) => {
            let message = api.to_string();
            if ["Bad Gateway", "Service Unavailable", "Gateway Timeout", "Too Many Requests"]
                .iter()
                .any(|needle| message.contains(needle))
            {
                UploadError::Network(message)
            } else {
                UploadError::BadRequest(message)
            }
        }
        other => UploadError::Other(other.to_string()),
    }
}

fn file_ids(message: &Message) -> Option<(String, String)> {
    if let Some(video) = message.video() {
        return Some((video.file.id.0.clone(), video.file.unique_id.0.clone()));
    }
    if let Some(audio) = message.audio() {
        return Some((audio.file.id.0.clone(), audio.file.unique_id.0.clone()));
    }
    if let Some(document) = message.document() {
        return Some((document.file.id.0.clone(), document.file.unique_id.0.clone()));
    }
    message
        .photo()
        .and_then(|sizes| sizes.last())
        .map(|photo| (photo.file.id.0.clone(), photo.file.unique_id.0.clone()))
}

pub struct BotSender {
    bot: Bot,
    channel: String,
    recipient: Recipient,
}

impl BotSender {
    pub fn new(bot: Bot, channel: &str) -> Self {
        Self {
            bot,
            channel: channel.trim().to_string(),
            recipient: parse_channel(channel),
        }
    }
}

#[async_trait]
impl ChannelSender for BotSender {
    async fn send(&self, request: SendRequest<'_>) -> Result<TelegramInfo, UploadError> {
        let file = InputFile::file(request.path.to_path_buf());
        let caption = request.caption.to_string();
        let to = self.recipient.clone();

        let sent = match request.method {
            UploadMethod::Video => {
                let mut req = self.bot.send_video(to, file).caption(caption).supports_streaming(true);
                if let Some(thumb) = request.thumbnail {
                    req = req.thumbnail(InputFile::file(thumb.to_path_buf()));
                }
                if request.markdown {
                    req.parse_mode(ParseMode::MarkdownV2).await
                } else {
                    req.await
                }
            }
            UploadMethod::Audio => {
                let req = self.bot.send_audio(to, file).caption(caption);
                if request.markdown {
                    req.parse_mode(ParseMode::MarkdownV2).await
                } else {
                    req.await
                }
            }
            UploadMethod::Photo => {
                let req = self.bot.send_photo(to, file).caption(caption);
                if request.markdown {
                    req.parse_mode(ParseMode::MarkdownV2).await
                } else {
                    req.await
                }
            }
            UploadMethod::Document => {
                let req = self.bot.send_document(to, file).caption(caption);
                if request.markdown {
                    req.parse_mode(ParseMode::MarkdownV2).await
                } else {
                    req.await
                }
            }
        };
        let message = sent.map_err(classify)?;

        let (file_id, file_unique_id) =
            file_ids(&message).ok_or_else(|| UploadError::Other("Telegram response carried no file".to_string()))?;
        let message_id = i64::from(message.id.0);
        Ok(TelegramInfo {
            file_id,
            file_unique_id,
            message_id,
            share_link: share_link(&self.channel, message_id),
        })
    }
}
