use percent_encoding::percent_decode_str;

/// Location handed to the engine for a clip URL: `file://` URLs become their
/// decoded path, anything else is passed through.
pub fn resource_path(url: &str) -> String {
    match url.strip_prefix("file://") {
        Some(rest) => {
            // file://host/path keeps only the path
            let path = if rest.starts_with('/') { rest } else { rest.find('/').map(|i| &rest[i..]).unwrap_or("") };
            percent_decode_str(path).decode_utf8_lossy().into_owned()
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_is_decoded() {
        assert_eq!(resource_path("file:///media/My%20Clip.mp4"), "/media/My Clip.mp4");
        assert_eq!(resource_path("file://localhost/tmp/a.mov"), "/tmp/a.mov");
    }

    #[test]
    fn test_plain_path_passes_through() {
        assert_eq!(resource_path("/tmp/a%20b.mp4"), "/tmp/a%20b.mp4");
        assert_eq!(resource_path("color:red"), "color:red");
    }
}
