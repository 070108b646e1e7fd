use std::path::{Component, Path};

use crate::ContentError;

/// Longest extension accepted from a client.
const MAX_EXTENSION_LEN: usize = 16;

/// Validates that a client-supplied content name is a single plain file name.
///
/// Content names are generated by the server, so anything that could walk
/// out of the category directory is rejected:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent or current directory references
/// - Any separator (more than one component)
pub fn validate_content_name(name: &str) -> Result<(), ContentError> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(ContentError::InvalidInput);
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ContentError::InvalidInput),
    }
}

/// Validates an extension supplied with `startUpload`.
///
/// The extension ends up in a file name, so only short ASCII alphanumeric
/// tokens pass.
pub fn validate_extension(ext: &str) -> Result<(), ContentError> {
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ContentError::InvalidExtension);
    }
    Ok(())
}

/// Returns the extension of a content name, if it has one.
///
/// `"abc.png"` → `Some("png")`, `"abc"` → `None`.
pub fn content_extension(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}
