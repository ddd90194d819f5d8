//! Language code normalization between the video platform and the
//! translation provider.
//!
//! The two providers agree on every code except Norwegian: the video
//! platform uses `no`, the translation provider uses `nb`.

/// Video-platform code to translation-provider code.
pub fn to_translation_code(code: &str) -> String {
    if code.eq_ignore_ascii_case("no") {
        "nb".to_string()
    } else {
        code.to_string()
    }
}

/// Translation-provider code to video-platform code.
pub fn to_video_code(code: &str) -> String {
    if code.eq_ignore_ascii_case("nb") {
        "no".to_string()
    } else {
        code.to_string()
    }
}

/// Case-insensitive language code comparison (`EN` == `en`).
pub fn same_language(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
