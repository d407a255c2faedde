//! Source platforms.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content platform a job's media originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Telegram,
    Youtube,
    Vk,
    Rutube,
    Twitch,
    /// Any direct http(s) media URL
    #[serde(alias = "generic-url")]
    GenericUrl,
    /// Media uploaded through the ingress
    #[serde(alias = "file-upload")]
    FileUpload,
}

impl Platform {
    /// All platforms, in declaration order.
    pub const ALL: [Platform; 7] = [
        Platform::Telegram,
        Platform::Youtube,
        Platform::Vk,
        Platform::Rutube,
        Platform::Twitch,
        Platform::GenericUrl,
        Platform::FileUpload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Youtube => "youtube",
            Platform::Vk => "vk",
            Platform::Rutube => "rutube",
            Platform::Twitch => "twitch",
            Platform::GenericUrl => "generic_url",
            Platform::FileUpload => "file_upload",
        }
    }

    /// Whether jobs on this platform start from a URL (as opposed to an upload).
    pub fn is_url_based(&self) -> bool {
        !matches!(self, Platform::FileUpload)
    }

    /// Detect the platform from a media URL host.
    ///
    /// Unknown hosts map to [`Platform::GenericUrl`]; unparseable input yields `None`.
    pub fn detect(raw_url: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw_url.trim()).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let host = host.strip_prefix("m.").unwrap_or(host);

        let matches_domain = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        let platform = if matches_domain("youtube.com") || matches_domain("youtu.be") {
            Platform::Youtube
        } else if matches_domain("t.me") || matches_domain("telegram.me") {
            Platform::Telegram
        } else if matches_domain("vk.com") || matches_domain("vkvideo.ru") || matches_domain("vk.ru") {
            Platform::Vk
        } else if matches_domain("rutube.ru") {
            Platform::Rutube
        } else if matches_domain("twitch.tv") {
            Platform::Twitch
        } else {
            Platform::GenericUrl
        };

        Some(platform)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "telegram" => Ok(Platform::Telegram),
            "youtube" => Ok(Platform::Youtube),
            "vk" => Ok(Platform::Vk),
            "rutube" => Ok(Platform::Rutube),
            "twitch" => Ok(Platform::Twitch),
            "generic_url" | "generic" | "url" => Ok(Platform::GenericUrl),
            "file_upload" | "file" | "upload" => Ok(Platform::FileUpload),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_known_hosts() {
        assert_eq!(Platform::detect("https://www.youtube.com/watch?v=abc"), Some(Platform::Youtube));
        assert_eq!(Platform::detect("https://youtu.be/abc"), Some(Platform::Youtube));
        assert_eq!(Platform::detect("https://m.youtube.com/shorts/abc"), Some(Platform::Youtube));
        assert_eq!(Platform::detect("https://t.me/channel/123"), Some(Platform::Telegram));
        assert_eq!(Platform::detect("https://vk.com/video-1_2"), Some(Platform::Vk));
        assert_eq!(Platform::detect("https://vkvideo.ru/video-1_2"), Some(Platform::Vk));
        assert_eq!(Platform::detect("https://rutube.ru/video/abc/"), Some(Platform::Rutube));
        assert_eq!(Platform::detect("https://www.twitch.tv/videos/1"), Some(Platform::Twitch));
    }

    #[test]
    fn test_detect_generic_and_invalid() {
        assert_eq!(Platform::detect("https://cdn.example.com/a.mp4"), Some(Platform::GenericUrl));
        // Lookalike host must not match
        assert_eq!(Platform::detect("https://notyoutube.com/x"), Some(Platform::GenericUrl));
        assert_eq!(Platform::detect("not a url"), None);
    }

    #[test]
    fn test_parse_accepts_hyphenated_names() {
        assert_eq!("generic-url".parse::<Platform>(), Ok(Platform::GenericUrl));
        assert_eq!("file-upload".parse::<Platform>(), Ok(Platform::FileUpload));
        assert_eq!("YouTube".parse::<Platform>(), Ok(Platform::Youtube));
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Platform::GenericUrl).unwrap(), "\"generic_url\"");
        let p: Platform = serde_json::from_str("\"file-upload\"").unwrap();
        assert_eq!(p, Platform::FileUpload);
    }
}
