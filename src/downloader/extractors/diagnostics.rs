// Extraction failure diagnostics
//
// Reads the extractor's stderr and names the most likely cause so the
// `error` event can carry something actionable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// DRM or paid content; nothing can be done
    DrmProtected,
    AgeRestricted,
    PrivateVideo,
    VideoUnavailable,
    GeoBlocked,
    RateLimited,
    BotDetection,
    Http403Forbidden,
    NetworkTimeout,
    UnsupportedUrl,
    Unknown,
}

impl FailureReason {
    /// Permanent restrictions are not worth retrying
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::DrmProtected | Self::VideoUnavailable | Self::UnsupportedUrl
        )
    }

    /// Whether routing through the anonymizing proxy could change the outcome
    pub fn proxy_might_help(&self) -> bool {
        matches!(
            self,
            Self::GeoBlocked
                | Self::RateLimited
                | Self::BotDetection
                | Self::Http403Forbidden
                | Self::NetworkTimeout
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DrmProtected => "DRM-protected content",
            Self::AgeRestricted => "Age-restricted content",
            Self::PrivateVideo => "Private video",
            Self::VideoUnavailable => "Video unavailable",
            Self::GeoBlocked => "Geographic restriction",
            Self::RateLimited => "Rate limited by the media host",
            Self::BotDetection => "Automated access detected",
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::NetworkTimeout => "Network timeout",
            Self::UnsupportedUrl => "Unsupported URL",
            Self::Unknown => "Unknown extraction failure",
        }
    }

    /// Hint attached to the extraction failure
    pub fn hint(&self, anonymized: bool) -> String {
        let mut hint = self.description().to_string();
        if self.is_permanent() {
            hint.push_str(". This cannot be worked around.");
        } else if self.proxy_might_help() && !anonymized {
            hint.push_str(". Retrying with anonymization enabled may help.");
        } else if self.proxy_might_help() {
            hint.push_str(". Wait a few minutes before retrying.");
        }
        hint
    }
}

/// Classify an extractor error message
pub fn diagnose_error(error: &str) -> FailureReason {
    let lower = error.to_lowercase();

    if contains_any(&lower, &["drm", "widevine", "playready", "fairplay", "requires purchase", "rental"]) {
        FailureReason::DrmProtected
    } else if contains_any(&lower, &["unsupported url", "is not a valid url"]) {
        FailureReason::UnsupportedUrl
    } else if contains_any(&lower, &["age-restricted", "confirm your age"]) {
        FailureReason::AgeRestricted
    } else if contains_any(&lower, &["private video", "video is private"]) {
        FailureReason::PrivateVideo
    } else if contains_any(&lower, &["video unavailable", "has been removed", "no longer available"]) {
        FailureReason::VideoUnavailable
    } else if contains_any(&lower, &["not available in your country", "geo restrict", "blocked in your country"]) {
        FailureReason::GeoBlocked
    } else if contains_any(&lower, &["429", "too many requests", "rate limit"]) {
        FailureReason::RateLimited
    } else if contains_any(&lower, &["sign in to confirm you're not a bot", "captcha", "unusual traffic"]) {
        FailureReason::BotDetection
    } else if contains_any(&lower, &["403", "forbidden"]) {
        FailureReason::Http403Forbidden
    } else if contains_any(&lower, &["timed out", "timeout", "connection refused", "network is unreachable"]) {
        FailureReason::NetworkTimeout
    } else {
        FailureReason::Unknown
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Most informative line of an error dump
pub fn summarize_error(error: &str) -> String {
    error
        .lines()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error:"))
        .or_else(|| error.lines().map(str::trim).rfind(|l| !l.is_empty()))
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_detection() {
        assert_eq!(
            diagnose_error("ERROR: HTTP Error 403: Forbidden"),
            FailureReason::Http403Forbidden
        );
    }

    #[test]
    fn test_rate_limit_detection() {
        assert_eq!(
            diagnose_error("HTTP Error 429: Too Many Requests"),
            FailureReason::RateLimited
        );
    }

    #[test]
    fn test_geo_detection() {
        assert_eq!(
            diagnose_error("Video not available in your country"),
            FailureReason::GeoBlocked
        );
    }

    #[test]
    fn test_drm_detection() {
        assert_eq!(
            diagnose_error("This video is DRM protected"),
            FailureReason::DrmProtected
        );
        assert!(FailureReason::DrmProtected.is_permanent());
    }

    #[test]
    fn test_timeout_detection() {
        assert_eq!(diagnose_error("Timed out after 30s"), FailureReason::NetworkTimeout);
    }

    #[test]
    fn test_hint_suggests_anonymization_only_when_off() {
        assert!(FailureReason::RateLimited.hint(false).contains("anonymization"));
        assert!(!FailureReason::RateLimited.hint(true).contains("anonymization"));
        assert!(FailureReason::VideoUnavailable.hint(false).contains("cannot be worked around"));
    }

    #[test]
    fn test_summarize_prefers_error_line() {
        let stderr = "WARNING: something\nERROR: [youtube] abc: Private video\n";
        assert_eq!(summarize_error(stderr), "ERROR: [youtube] abc: Private video");
        assert_eq!(summarize_error("first\nlast\n\n"), "last");
        assert_eq!(summarize_error(""), "");
    }
}
