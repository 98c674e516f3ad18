use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::seq::IndexedRandom;
use std::path::{Path, PathBuf};

/// URL prefix the images directory is served under.
pub const IMAGES_ROUTE: &str = "/images";

/// Everything but RFC 3986 unreserved characters is escaped in a path segment.
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioImage {
    pub file_name: String,
    pub path: PathBuf,
    pub mime_type: &'static str,
}

impl ScenarioImage {
    pub fn public_url(&self) -> String {
        format!(
            "{}/{}",
            IMAGES_ROUTE,
            utf8_percent_encode(&self.file_name, PATH_SEGMENT_ENCODE_SET)
        )
    }
}

pub fn mime_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Image files directly inside `dir`, sorted by file name.
pub async fn list_images(dir: &Path) -> std::io::Result<Vec<ScenarioImage>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut images = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let (Some(mime_type), Some(file_name)) = (
            mime_for(&path),
            path.file_name().and_then(|name| name.to_str()).map(str::to_string),
        ) else {
            continue;
        };
        images.push(ScenarioImage {
            file_name,
            path,
            mime_type,
        });
    }

    images.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(images)
}

/// Uniform pick from the directory. `None` when it is missing, unreadable or
/// holds no images.
pub async fn pick_random(dir: &Path) -> Option<ScenarioImage> {
    let images = match list_images(dir).await {
        Ok(images) => images,
        Err(e) => {
            tracing::warn!("Scenario images unavailable at {}: {}", dir.display(), e);
            return None;
        }
    };

    if images.is_empty() {
        tracing::warn!("No scenario images in {}", dir.display());
        return None;
    }

    images.choose(&mut rand::rng()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_dir_with(files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scenario-images-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        for file in files {
            tokio::fs::write(dir.join(file), b"img").await.unwrap();
        }
        dir
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_for(Path::new("a.png")), Some("image/png"));
        assert_eq!(mime_for(Path::new("a.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for(Path::new("a.gif")), None);
        assert_eq!(mime_for(Path::new("README")), None);
    }

    #[tokio::test]
    async fn lists_only_images() {
        let dir = temp_dir_with(&["junction.png", "notes.txt", "roundabout.jpeg"]).await;

        let images = list_images(&dir).await.unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.file_name.as_str()).collect();

        assert_eq!(names, vec!["junction.png", "roundabout.jpeg"]);
        assert_eq!(images[0].public_url(), "/images/junction.png");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[test]
    fn public_url_escapes_file_name() {
        let image = |file_name: &str| ScenarioImage {
            file_name: file_name.to_string(),
            path: PathBuf::from(file_name),
            mime_type: "image/png",
        };

        assert_eq!(image("stop sign.png").public_url(), "/images/stop%20sign.png");
        assert_eq!(image("yield#2.png").public_url(), "/images/yield%232.png");
        assert_eq!(image("50%.png").public_url(), "/images/50%25.png");
        assert_eq!(image("road-works_1.png").public_url(), "/images/road-works_1.png");
    }

    #[tokio::test]
    async fn missing_or_empty_directory_yields_none() {
        let missing = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        assert!(pick_random(&missing).await.is_none());

        let empty = temp_dir_with(&["readme.md"]).await;
        assert!(pick_random(&empty).await.is_none());
        tokio::fs::remove_dir_all(&empty).await.ok();
    }

    #[tokio::test]
    async fn picks_one_of_the_images() {
        let dir = temp_dir_with(&["a.png", "b.jpg"]).await;

        let picked = pick_random(&dir).await.unwrap();

        assert!(["a.png", "b.jpg"].contains(&picked.file_name.as_str()));
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
