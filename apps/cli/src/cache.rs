use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::{Path, PathBuf},
};

use shotlist_core::types::MediaRef;

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("shotlist")
}

/// Working directory for one media reference
pub fn get_work_dir(media: &MediaRef) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    hash_key(media).hash(&mut hasher);
    get_root_cache_dir().join(hasher.finish().to_string())
}

pub fn get_frames_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("frames")
}

pub fn get_audio_path(work_dir: &Path) -> PathBuf {
    work_dir.join("audio.wav")
}

pub fn get_transcript_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("transcript")
}

/// Local path behind a `file://` reference, if that is what it is.
pub fn local_path(media: &MediaRef) -> Option<PathBuf> {
    match media {
        MediaRef::Url { url } => url.strip_prefix("file://").map(PathBuf::from),
        MediaRef::Inline { .. } => None,
    }
}

pub fn file_ref(path: &Path) -> MediaRef {
    MediaRef::url(format!("file://{}", path.display()))
}

fn hash_key(media: &MediaRef) -> &str {
    match media {
        MediaRef::Url { url } => url,
        MediaRef::Inline { data, .. } => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_refs_round_trip_to_paths() {
        let path = Path::new("/tmp/shotlist/audio.wav");
        assert_eq!(local_path(&file_ref(path)).as_deref(), Some(path));
        assert_eq!(local_path(&MediaRef::url("https://cdn.test/a.mp4")), None);
    }

    #[test]
    fn work_dirs_are_stable_per_media() {
        let a = MediaRef::url("https://cdn.test/a.mp4");
        let b = MediaRef::url("https://cdn.test/b.mp4");
        assert_eq!(get_work_dir(&a), get_work_dir(&a));
        assert_ne!(get_work_dir(&a), get_work_dir(&b));
    }
}
