use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::recipe::repo;
use crate::state::AppState;

pub const RECIPE_IMAGE_DIR: &str = "upload/recipe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
}

impl ImageKind {
    /// Detects the format from the leading magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] if data.len() >= 26 => Some(Self::Bmp),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

/// An uploaded file that was recognised as an image.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: Option<String>,
    pub kind: ImageKind,
    pub body: Bytes,
}

impl ImageUpload {
    pub fn new(filename: Option<String>, body: Bytes) -> Result<Self, AppError> {
        if body.is_empty() {
            return Err(AppError::field("image", "The submitted file is empty."));
        }
        let kind = ImageKind::sniff(&body).ok_or_else(|| {
            AppError::field(
                "image",
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            )
        })?;
        Ok(Self {
            filename,
            kind,
            body,
        })
    }
}

/// `upload/recipe/<uuid>.<ext>`, keeping the extension of the uploaded name.
pub fn recipe_image_path(filename: Option<&str>, fallback_ext: &str) -> String {
    recipe_image_path_with_id(Uuid::new_v4(), filename, fallback_ext)
}

fn recipe_image_path_with_id(id: Uuid, filename: Option<&str>, fallback_ext: &str) -> String {
    let ext = filename
        .and_then(|name| name.rsplit(|c: char| c == '/' || c == '\\').next())
        .and_then(|base| base.rsplit('.').next())
        .map(|ext| ext.trim())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(fallback_ext);
    format!("{RECIPE_IMAGE_DIR}/{id}.{ext}")
}

/// Stores the image and points the recipe at it. The previous image, if
/// any, is removed once the new key is committed.
pub async fn attach_recipe_image(
    st: &AppState,
    user_id: Uuid,
    recipe_id: i64,
    upload: ImageUpload,
) -> Result<String, AppError> {
    if repo::get(&st.db, user_id, recipe_id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let key = recipe_image_path(upload.filename.as_deref(), upload.kind.extension());
    st.storage
        .put_object(&key, upload.body, upload.kind.mime())
        .await
        .with_context(|| format!("put_object {}", key))?;

    let swap = async {
        let mut tx = st.db.begin().await.context("begin tx")?;
        let previous = repo::set_image_tx(&mut tx, user_id, recipe_id, &key).await?;
        tx.commit().await.context("commit tx")?;
        anyhow::Ok(previous)
    };

    let previous = match swap.await {
        Ok(Some(previous)) => previous,
        Ok(None) => {
            discard(st, &key).await;
            return Err(AppError::NotFound);
        }
        Err(e) => {
            discard(st, &key).await;
            return Err(e.into());
        }
    };

    if let Some(old) = previous.filter(|old| *old != key) {
        discard(st, &old).await;
    }
    info!(%user_id, recipe_id, image = %key, "recipe image stored");
    Ok(key)
}

async fn discard(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %e, key, "failed to delete stored image");
    }
}
