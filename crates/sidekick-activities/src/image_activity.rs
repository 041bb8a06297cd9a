//! Image-Read Activity (SPEC_FULL.md §4.J).

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use image::GenericImageView;
use sidekick_core::error::CoreError;
use sidekick_core::ids::IdGenerator;
use sidekick_core::Result;
use sidekick_kv::KvStore;
use tokio_util::sync::CancellationToken;

const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
const MAX_LONGEST_EDGE_PX: u32 = 1568;

fn is_safe_relative_path(rel_path: &str) -> bool {
    if rel_path.is_empty() {
        return false;
    }
    let path = Path::new(rel_path);
    if path.is_absolute() {
        return false;
    }
    !path.components().any(|c| matches!(c, std::path::Component::ParentDir))
}

/// `read_image(flow_id, ws, env_root, rel_path) -> key`. Rejects any path
/// that could escape `env_root` before doing any file I/O.
pub async fn read_image(
    cancel: &CancellationToken,
    kv: &dyn KvStore,
    ids: &dyn IdGenerator,
    flow_id: &str,
    workspace_id: &str,
    env_root: &Path,
    rel_path: &str,
) -> Result<String> {
    if !is_safe_relative_path(rel_path) {
        return Err(CoreError::Arg(format!("unsafe relative path: {rel_path}")));
    }

    let full_path = env_root.join(rel_path);
    let canonical_root = env_root.canonicalize().map_err(|e| CoreError::Storage(e.to_string()))?;
    let canonical_path = full_path.canonicalize().map_err(|e| CoreError::Storage(e.to_string()))?;
    if !canonical_path.starts_with(&canonical_root) {
        return Err(CoreError::Arg(format!("path resolves outside environment root: {rel_path}")));
    }

    let bytes = std::fs::read(&canonical_path).map_err(|e| CoreError::Storage(e.to_string()))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(CoreError::Type(format!("image exceeds {MAX_IMAGE_BYTES} byte limit")));
    }

    let kind = infer::get(&bytes);
    let mime = match kind {
        Some(k) if k.mime_type().starts_with("image/") => k.mime_type().to_string(),
        _ => return Err(CoreError::Type("file content is not an image".to_string())),
    };

    let clamped = clamp_dimensions(&bytes, &mime);
    let b64 = base64::engine::general_purpose::STANDARD.encode(&clamped);
    let data_url = format!("data:{mime};base64,{b64}");

    let id = ids.next_id();
    let key = format!("{flow_id}:img:{id}");
    let mut values = BTreeMap::new();
    values.insert(key.clone(), data_url.into_bytes());
    kv.mset_raw(cancel, workspace_id, values).await?;
    Ok(key)
}

/// Reference form embedded in chat content for an image stored via
/// [`read_image`].
pub fn build_kv_image_url(key: &str) -> String {
    format!("kv:{key}")
}

/// Downscales to a longest edge of [`MAX_LONGEST_EDGE_PX`], preserving
/// aspect ratio. Falls back to the original bytes unchanged for formats
/// `image` doesn't decode (e.g. sniffed as an image type outside the
/// decoders this crate enables) rather than failing the read.
fn clamp_dimensions(bytes: &[u8], mime: &str) -> Vec<u8> {
    let Some(format) = image::ImageFormat::from_mime_type(mime) else {
        return bytes.to_vec();
    };
    let Ok(img) = image::load_from_memory_with_format(bytes, format) else {
        return bytes.to_vec();
    };

    let (width, height) = img.dimensions();
    let longest_edge = width.max(height);
    if longest_edge <= MAX_LONGEST_EDGE_PX {
        return bytes.to_vec();
    }

    let scale = MAX_LONGEST_EDGE_PX as f64 / longest_edge as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

    let mut out = Vec::new();
    match resized.write_to(&mut std::io::Cursor::new(&mut out), format) {
        Ok(()) => out,
        Err(_) => bytes.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidekick_core::ids::SequentialIdGenerator;
    use sidekick_kv::InMemoryKvStore;

    fn png_bytes() -> Vec<u8> {
        // Minimal valid PNG signature + IHDR-ish bytes; enough for `infer`
        // to sniff as image/png.
        vec![
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
        ]
    }

    fn real_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn decode_data_url_dimensions(data_url: &str) -> (u32, u32) {
        let b64 = data_url.split_once("base64,").unwrap().1;
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        image::load_from_memory(&bytes).unwrap().dimensions()
    }

    #[tokio::test]
    async fn rejects_path_traversal_before_any_io() {
        let kv = InMemoryKvStore::new();
        let ids = SequentialIdGenerator::new("img");
        let cancel = CancellationToken::new();
        let root = tempfile::tempdir().unwrap();

        let err = read_image(&cancel, &kv, &ids, "flow1", "ws1", root.path(), "../escape.png")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FAIL_ARG");

        let err = read_image(&cancel, &kv, &ids, "flow1", "ws1", root.path(), "/abs/escape.png")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FAIL_ARG");
    }

    #[tokio::test]
    async fn reads_image_and_stores_data_url() {
        let kv = InMemoryKvStore::new();
        let ids = SequentialIdGenerator::new("img");
        let cancel = CancellationToken::new();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("pic.png"), png_bytes()).unwrap();

        let key = read_image(&cancel, &kv, &ids, "flow1", "ws1", root.path(), "pic.png").await.unwrap();
        assert_eq!(key, "flow1:img:img-0");
        assert_eq!(build_kv_image_url(&key), "kv:flow1:img:img-0");

        let stored = kv.mget(&cancel, "ws1", &[key]).await.unwrap();
        let bytes = stored[0].as_ref().unwrap();
        assert!(String::from_utf8_lossy(bytes).starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn non_image_content_fails_with_type_error() {
        let kv = InMemoryKvStore::new();
        let ids = SequentialIdGenerator::new("img");
        let cancel = CancellationToken::new();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("notes.txt"), b"just text").unwrap();

        let err = read_image(&cancel, &kv, &ids, "flow1", "ws1", root.path(), "notes.txt").await.unwrap_err();
        assert_eq!(err.code(), "FAIL_TYPE");
    }

    #[tokio::test]
    async fn oversized_image_is_downscaled_to_longest_edge_limit() {
        let kv = InMemoryKvStore::new();
        let ids = SequentialIdGenerator::new("img");
        let cancel = CancellationToken::new();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("big.png"), real_png(3000, 1000)).unwrap();

        let key = read_image(&cancel, &kv, &ids, "flow1", "ws1", root.path(), "big.png").await.unwrap();
        let stored = kv.mget(&cancel, "ws1", &[key]).await.unwrap();
        let data_url = String::from_utf8_lossy(stored[0].as_ref().unwrap()).to_string();

        let (width, height) = decode_data_url_dimensions(&data_url);
        assert_eq!(width, MAX_LONGEST_EDGE_PX);
        assert_eq!(height, (1000.0 * (MAX_LONGEST_EDGE_PX as f64 / 3000.0)).round() as u32);
    }

    #[tokio::test]
    async fn small_image_passes_through_unscaled() {
        let kv = InMemoryKvStore::new();
        let ids = SequentialIdGenerator::new("img");
        let cancel = CancellationToken::new();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("small.png"), real_png(100, 50)).unwrap();

        let key = read_image(&cancel, &kv, &ids, "flow1", "ws1", root.path(), "small.png").await.unwrap();
        let stored = kv.mget(&cancel, "ws1", &[key]).await.unwrap();
        let data_url = String::from_utf8_lossy(stored[0].as_ref().unwrap()).to_string();

        let (width, height) = decode_data_url_dimensions(&data_url);
        assert_eq!((width, height), (100, 50));
    }
}
