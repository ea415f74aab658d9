use url::Url;

/// Guesses a MIME type from the file extension of the last path segment of `url`.
pub fn mime_type_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    mime_guess::from_ext(ext).first().map(|m| m.essence_str().to_string())
}
