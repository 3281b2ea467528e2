//! Multiview image sequences (`name.NN.ext`, one file per view).

use std::path::{Path, PathBuf};

use crate::compositor::QuiltTexture;
use crate::foundation::core::PixelBuffer;
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::layout::QuiltLayout;

/// Path of view `index` for a base path `name.ext` → `name.NN.ext`.
pub fn sequence_path(base: &Path, index: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}.{index:02}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{index:02}"),
    };
    base.with_file_name(name)
}

/// Recover the base path from the first frame of a sequence (`name.00.ext` → `name.ext`).
pub fn base_from_first_frame(first: &Path) -> HoloquiltResult<PathBuf> {
    let file = first
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| {
            HoloquiltError::config(format!("'{}' has no file name", first.display()))
        })?;

    let parts: Vec<&str> = file.rsplitn(3, '.').collect();
    let (stem, index, ext) = match parts.as_slice() {
        [ext, index, stem] => (*stem, *index, Some(*ext)),
        [index, stem] if index.chars().all(|c| c.is_ascii_digit()) => (*stem, *index, None),
        _ => {
            return Err(HoloquiltError::config(format!(
                "'{file}' is not named like 'name.00.ext'"
            )));
        }
    };
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) || index.parse::<u32>() != Ok(0) {
        return Err(HoloquiltError::config(format!(
            "'{file}' is not the first frame of a sequence (expected index 00)"
        )));
    }

    let name = match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_owned(),
    };
    Ok(first.with_file_name(name))
}

/// An on-disk view sequence matching a quilt layout.
///
/// Views are decoded once, on first use, and kept in memory until [`ImageSequence::reload`].
#[derive(Clone)]
pub struct ImageSequence {
    base: PathBuf,
    total_views: u32,
    views: Option<Vec<PixelBuffer>>,
}

impl std::fmt::Debug for ImageSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSequence")
            .field("base", &self.base)
            .field("total_views", &self.total_views)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ImageSequence {
    pub fn new(base: impl Into<PathBuf>, total_views: u32) -> HoloquiltResult<Self> {
        if total_views <= 1 {
            return Err(HoloquiltError::config(format!(
                "an image sequence needs at least 2 views, got {total_views}"
            )));
        }
        Ok(Self {
            base: base.into(),
            total_views,
            views: None,
        })
    }

    pub fn from_first_frame(first: &Path, total_views: u32) -> HoloquiltResult<Self> {
        Self::new(base_from_first_frame(first)?, total_views)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn total_views(&self) -> u32 {
        self.total_views
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        (0..self.total_views)
            .map(|i| sequence_path(&self.base, i))
            .collect()
    }

    /// Paths that are not present on disk.
    pub fn missing(&self) -> Vec<PathBuf> {
        self.paths().into_iter().filter(|p| !p.is_file()).collect()
    }

    /// Load view `index` as a bottom-up RGBA8 buffer.
    pub fn load_view(&self, index: u32) -> HoloquiltResult<PixelBuffer> {
        if index >= self.total_views {
            return Err(HoloquiltError::config(format!(
                "view index {index} out of range for {} views",
                self.total_views
            )));
        }
        PixelBuffer::load(&sequence_path(&self.base, index))
    }

    pub fn is_loaded(&self) -> bool {
        self.views.is_some()
    }

    /// Forget the decoded views; the next use reads the files again.
    pub fn reload(&mut self) {
        self.views = None;
    }

    /// Every view, decoded from disk on the first call.
    pub fn views(&mut self) -> HoloquiltResult<&[PixelBuffer]> {
        if self.views.is_none() {
            let loaded = (0..self.total_views)
                .map(|i| self.load_view(i))
                .collect::<HoloquiltResult<Vec<_>>>()?;
            tracing::debug!(views = loaded.len(), base = %self.base.display(), "decoded image sequence");
            self.views = Some(loaded);
        }
        Ok(self.views.as_deref().unwrap_or_default())
    }

    /// Blit every view into `quilt`. Each image must match the tile size exactly.
    #[tracing::instrument(skip(self, quilt), fields(base = %self.base.display()))]
    pub fn composite_into(&mut self, quilt: &mut QuiltTexture) -> HoloquiltResult<()> {
        let layout: QuiltLayout = *quilt.layout();
        if layout.total_views() != self.total_views {
            return Err(HoloquiltError::config(format!(
                "sequence has {} views but the quilt holds {}",
                self.total_views,
                layout.total_views()
            )));
        }
        for (i, view) in self.views()?.iter().enumerate() {
            quilt.blit_view(i as u32, view)?;
        }
        Ok(())
    }

    /// Write one view per file, e.g. after splitting a quilt. Drops any decoded views.
    pub fn save_views(&mut self, views: &[PixelBuffer]) -> HoloquiltResult<()> {
        if views.len() != self.total_views as usize {
            return Err(HoloquiltError::config(format!(
                "got {} views for a sequence of {}",
                views.len(),
                self.total_views
            )));
        }
        self.views = None;
        for (i, v) in views.iter().enumerate() {
            v.save_png(&sequence_path(&self.base, i as u32))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_paths_are_zero_padded() {
        let base = Path::new("/tmp/out/frame.png");
        assert_eq!(sequence_path(base, 0), PathBuf::from("/tmp/out/frame.00.png"));
        assert_eq!(sequence_path(base, 44), PathBuf::from("/tmp/out/frame.44.png"));
        assert_eq!(
            sequence_path(Path::new("render"), 3),
            PathBuf::from("render.03")
        );
    }

    #[test]
    fn base_recovered_from_first_frame() {
        assert_eq!(
            base_from_first_frame(Path::new("/tmp/out/frame.00.png")).unwrap(),
            PathBuf::from("/tmp/out/frame.png")
        );
        assert_eq!(
            base_from_first_frame(Path::new("shot.v2.00.jpg")).unwrap(),
            PathBuf::from("shot.v2.jpg")
        );
    }

    #[test]
    fn non_first_frames_are_rejected() {
        assert!(base_from_first_frame(Path::new("frame.03.png")).is_err());
        assert!(base_from_first_frame(Path::new("frame.png")).is_err());
    }

    #[test]
    fn single_view_sequences_are_config_errors() {
        assert!(matches!(
            ImageSequence::new("frame.png", 1),
            Err(HoloquiltError::Config(_))
        ));
    }
}
