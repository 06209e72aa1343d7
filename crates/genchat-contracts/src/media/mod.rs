mod extractor;
mod kind;

pub use extractor::{extract_all_media, extract_media_references, is_remote_reference, url_pattern};
pub use kind::{mime_for_path, path_extension, MediaKind};
