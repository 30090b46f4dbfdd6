//! Image and label loading
//!
//! MNIST IDX files for batch evaluation, PGM for single images. Pixels are
//! kept as bytes until a sample is requested, then normalized into an
//! [`Image<f32>`] ready for quantization.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Image, IMG_HEIGHT, IMG_WIDTH, NUM_CLASSES};
use crate::error::{ModelError, Result};

const IDX_IMAGES_MAGIC: u32 = 2051;
/// Upper bound on up-front reservation; header counts are untrusted
const IDX_PREALLOC_LIMIT: usize = 10_000;
const IDX_LABELS_MAGIC: u32 = 2049;

/// MNIST test-set file names
pub const TEST_IMAGES_FILE: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS_FILE: &str = "t10k-labels-idx1-ubyte";

const IMAGE_PIXELS: usize = IMG_HEIGHT * IMG_WIDTH;

/// Pixel scaling applied before quantization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// pixel / 255, the range the network was trained on
    #[default]
    UnitRange,
    /// Raw 0..=255 intensities
    Raw,
}

impl Normalization {
    pub fn apply(self, pixel: u8) -> f32 {
        match self {
            Normalization::UnitRange => pixel as f32 / 255.0,
            Normalization::Raw => pixel as f32,
        }
    }
}

impl FromStr for Normalization {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unit" | "unit-range" | "unit_range" => Ok(Self::UnitRange),
            "raw" => Ok(Self::Raw),
            other => Err(ModelError::InvalidFormat(format!(
                "unknown normalization '{}' (expected unit-range or raw)",
                other
            ))),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::UnitRange => write!(f, "unit-range"),
            Normalization::Raw => write!(f, "raw"),
        }
    }
}

/// Build an input image from 784 row-major grayscale pixels
pub fn image_from_pixels(pixels: &[u8], normalization: Normalization) -> Result<Image<f32>> {
    if pixels.len() != IMAGE_PIXELS {
        return Err(ModelError::InvalidShape {
            tensor: "image".to_string(),
            expected: vec![IMG_HEIGHT, IMG_WIDTH],
            got: vec![pixels.len()],
        });
    }
    Ok(Image::from_fn(|[_, y, x]| normalization.apply(pixels[y * IMG_WIDTH + x])))
}

fn check_magic(found: u32, expected: u32, what: &str) -> Result<()> {
    if found != expected {
        return Err(ModelError::InvalidFormat(format!(
            "bad IDX {} magic: expected {}, got {}",
            what, expected, found
        )));
    }
    Ok(())
}

fn truncated(what: &str) -> impl FnOnce(std::io::Error) -> ModelError + '_ {
    move |e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            ModelError::InvalidFormat(format!("IDX {} file truncated", what))
        }
        _ => ModelError::Io(e),
    }
}

/// Read an IDX3 image file; every image must be 28×28
pub fn read_idx_images<R: Read>(mut reader: R) -> Result<Vec<Vec<u8>>> {
    check_magic(reader.read_u32::<BigEndian>()?, IDX_IMAGES_MAGIC, "image")?;
    let count = reader.read_u32::<BigEndian>()? as usize;
    let rows = reader.read_u32::<BigEndian>()? as usize;
    let cols = reader.read_u32::<BigEndian>()? as usize;
    if (rows, cols) != (IMG_HEIGHT, IMG_WIDTH) {
        return Err(ModelError::InvalidShape {
            tensor: "idx images".to_string(),
            expected: vec![IMG_HEIGHT, IMG_WIDTH],
            got: vec![rows, cols],
        });
    }

    let mut images = Vec::with_capacity(count.min(IDX_PREALLOC_LIMIT));
    for _ in 0..count {
        let mut pixels = vec![0u8; IMAGE_PIXELS];
        reader.read_exact(&mut pixels).map_err(truncated("image"))?;
        images.push(pixels);
    }
    Ok(images)
}

/// Read an IDX1 label file; every label must be a digit
pub fn read_idx_labels<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    check_magic(reader.read_u32::<BigEndian>()?, IDX_LABELS_MAGIC, "label")?;
    let count = reader.read_u32::<BigEndian>()? as usize;

    let mut labels = Vec::with_capacity(count.min(IDX_PREALLOC_LIMIT));
    reader.take(count as u64).read_to_end(&mut labels)?;
    if labels.len() != count {
        return Err(ModelError::InvalidFormat("IDX label file truncated".to_string()));
    }
    if let Some(bad) = labels.iter().find(|&&l| l as usize >= NUM_CLASSES) {
        return Err(ModelError::InvalidFormat(format!("label {} out of range", bad)));
    }
    Ok(labels)
}

/// One labeled input
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub index: usize,
    pub image: Image<f32>,
    pub label: usize,
}

/// Labeled grayscale digits
#[derive(Debug, Clone)]
pub struct MnistDataset {
    images: Vec<Vec<u8>>,
    labels: Vec<u8>,
    normalization: Normalization,
}

impl MnistDataset {
    /// Load the MNIST test split from a directory
    pub fn load<P: AsRef<Path>>(dir: P, normalization: Normalization) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_files(
            dir.join(TEST_IMAGES_FILE),
            dir.join(TEST_LABELS_FILE),
            normalization,
        )
    }

    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(
        images: P,
        labels: Q,
        normalization: Normalization,
    ) -> Result<Self> {
        let images = read_idx_images(BufReader::new(File::open(images)?))?;
        let labels = read_idx_labels(BufReader::new(File::open(labels)?))?;
        let dataset = Self::from_idx(images, labels, normalization)?;
        info!(samples = dataset.len(), %normalization, "Loaded MNIST dataset");
        Ok(dataset)
    }

    /// Pair decoded images with labels
    pub fn from_idx(images: Vec<Vec<u8>>, labels: Vec<u8>, normalization: Normalization) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(ModelError::InvalidFormat(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        if let Some(bad) = images.iter().find(|i| i.len() != IMAGE_PIXELS) {
            return Err(ModelError::InvalidShape {
                tensor: "image".to_string(),
                expected: vec![IMG_HEIGHT, IMG_WIDTH],
                got: vec![bad.len()],
            });
        }
        Ok(Self {
            images,
            labels,
            normalization,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Keep only the first `limit` samples
    pub fn truncate(&mut self, limit: usize) {
        self.images.truncate(limit);
        self.labels.truncate(limit);
    }

    pub fn get(&self, index: usize) -> Option<Sample> {
        let pixels = self.images.get(index)?;
        let label = *self.labels.get(index)? as usize;
        let image = Image::from_fn(|[_, y, x]| self.normalization.apply(pixels[y * IMG_WIDTH + x]));
        Some(Sample { index, image, label })
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

// ============================================================================
// PGM
// ============================================================================

/// Byte cursor over a PGM header
struct PgmHeader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PgmHeader<'a> {
    fn skip_space_and_comments(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'#' {
                while self.bytes.get(self.pos).is_some_and(|&c| c != b'\n') {
                    self.pos += 1;
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> Result<&'a str> {
        self.skip_space_and_comments();
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| !b.is_ascii_whitespace() && *b != b'#')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ModelError::InvalidFormat("PGM header truncated".to_string()));
        }
        let bytes: &'a [u8] = self.bytes;
        std::str::from_utf8(&bytes[start..self.pos])
            .map_err(|_| ModelError::InvalidFormat("PGM header is not ASCII".to_string()))
    }

    fn number(&mut self) -> Result<usize> {
        let token = self.token()?;
        token
            .parse()
            .map_err(|_| ModelError::InvalidFormat(format!("bad PGM number '{}'", token)))
    }
}

/// Read a P5 (binary) or P2 (ASCII) PGM; the image must be 28×28.
///
/// Pixels are rescaled to 0..=255 when the file's maxval is smaller.
pub fn read_pgm<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mut header = PgmHeader { bytes: &bytes, pos: 0 };
    let magic = header.token()?;
    let binary = match magic {
        "P5" => true,
        "P2" => false,
        other => {
            return Err(ModelError::InvalidFormat(format!("unsupported PGM magic '{}'", other)))
        }
    };
    let width = header.number()?;
    let height = header.number()?;
    let maxval = header.number()?;

    if (height, width) != (IMG_HEIGHT, IMG_WIDTH) {
        return Err(ModelError::InvalidShape {
            tensor: "pgm".to_string(),
            expected: vec![IMG_HEIGHT, IMG_WIDTH],
            got: vec![height, width],
        });
    }
    if maxval == 0 || maxval > 255 {
        return Err(ModelError::InvalidFormat(format!("unsupported PGM maxval {}", maxval)));
    }

    let raw: Vec<usize> = if binary {
        // Exactly one whitespace byte separates the header from the raster
        let start = header.pos + 1;
        let raster = bytes
            .get(start..start + IMAGE_PIXELS)
            .ok_or_else(|| ModelError::InvalidFormat("PGM raster truncated".to_string()))?;
        raster.iter().map(|&b| b as usize).collect()
    } else {
        (0..IMAGE_PIXELS)
            .map(|_| header.number())
            .collect::<Result<_>>()?
    };

    raw.into_iter()
        .map(|v| {
            if v > maxval {
                return Err(ModelError::InvalidFormat(format!("PGM pixel {} exceeds maxval", v)));
            }
            Ok(((v * 255 + maxval / 2) / maxval) as u8)
        })
        .collect()
}

pub fn load_pgm<P: AsRef<Path>>(path: P, normalization: Normalization) -> Result<Image<f32>> {
    let pixels = read_pgm(BufReader::new(File::open(path)?))?;
    image_from_pixels(&pixels, normalization)
}

/// Write a binary (P5) PGM with maxval 255
pub fn write_pgm<W: Write>(mut writer: W, pixels: &[u8], width: usize, height: usize) -> Result<()> {
    if pixels.len() != width * height {
        return Err(ModelError::InvalidShape {
            tensor: "pgm".to_string(),
            expected: vec![height, width],
            got: vec![pixels.len()],
        });
    }
    write!(writer, "P5\n{} {}\n255\n", width, height)?;
    writer.write_all(pixels)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn idx_images(count: u32, rows: u32, cols: u32, fill: impl Fn(usize) -> u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in [IDX_IMAGES_MAGIC, count, rows, cols] {
            bytes.write_u32::<BigEndian>(v).unwrap();
        }
        bytes.extend((0..count as usize * (rows * cols) as usize).map(fill));
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.write_u32::<BigEndian>(IDX_LABELS_MAGIC).unwrap();
        bytes.write_u32::<BigEndian>(labels.len() as u32).unwrap();
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn test_normalization_parse() {
        assert_eq!("unit-range".parse::<Normalization>().unwrap(), Normalization::UnitRange);
        assert_eq!("RAW".parse::<Normalization>().unwrap(), Normalization::Raw);
        assert!("zscore".parse::<Normalization>().is_err());
        assert_eq!(Normalization::default().to_string(), "unit-range");
        assert_eq!(Normalization::UnitRange.apply(255), 1.0);
        assert_eq!(Normalization::Raw.apply(255), 255.0);
    }

    #[test]
    fn test_read_idx() {
        let images = read_idx_images(&idx_images(3, 28, 28, |i| (i % 251) as u8)[..]).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(images[1][0], (784 % 251) as u8);

        let labels = read_idx_labels(&idx_labels(&[7, 2, 1])[..]).unwrap();
        assert_eq!(labels, vec![7, 2, 1]);

        let dataset = MnistDataset::from_idx(images, labels, Normalization::Raw).unwrap();
        let sample = dataset.get(2).unwrap();
        assert_eq!(sample.label, 1);
        assert_eq!(sample.image[[0, 0, 1]], ((2 * 784 + 1) % 251) as f32);
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn test_idx_rejects_bad_input() {
        let mut bad_magic = idx_images(1, 28, 28, |_| 0);
        bad_magic[3] = 0x04;
        assert!(matches!(read_idx_images(&bad_magic[..]), Err(ModelError::InvalidFormat(_))));
        assert!(matches!(
            read_idx_labels(&idx_images(1, 28, 28, |_| 0)[..]),
            Err(ModelError::InvalidFormat(_))
        ));

        assert!(matches!(
            read_idx_images(&idx_images(1, 32, 32, |_| 0)[..]),
            Err(ModelError::InvalidShape { .. })
        ));

        let short = idx_images(2, 28, 28, |_| 0);
        assert!(matches!(
            read_idx_images(&short[..short.len() - 1]),
            Err(ModelError::InvalidFormat(_))
        ));

        // Header counts far beyond the payload fail as truncation
        let mut huge = Vec::new();
        for v in [IDX_IMAGES_MAGIC, u32::MAX, 28, 28] {
            huge.write_u32::<BigEndian>(v).unwrap();
        }
        huge.extend(std::iter::repeat(0u8).take(IMAGE_PIXELS));
        assert!(matches!(read_idx_images(&huge[..]), Err(ModelError::InvalidFormat(_))));

        let mut huge_labels = idx_labels(&[1, 2, 3]);
        huge_labels[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(read_idx_labels(&huge_labels[..]), Err(ModelError::InvalidFormat(_))));

        assert!(read_idx_labels(&idx_labels(&[3, 10])[..]).is_err());
        assert!(MnistDataset::from_idx(vec![vec![0; 784]], vec![1, 2], Normalization::Raw).is_err());
    }

    #[test]
    fn test_dataset_from_directory() {
        let dir = std::env::temp_dir().join(format!("qlenet-mnist-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TEST_IMAGES_FILE), idx_images(4, 28, 28, |_| 255)).unwrap();
        std::fs::write(dir.join(TEST_LABELS_FILE), idx_labels(&[0, 1, 2, 3])).unwrap();

        let mut dataset = MnistDataset::load(&dir, Normalization::UnitRange).unwrap();
        assert_eq!(dataset.len(), 4);
        dataset.truncate(2);
        let labels: Vec<usize> = dataset.samples().map(|s| s.label).collect();
        assert_eq!(labels, vec![0, 1]);
        assert!(dataset.samples().all(|s| s.image.iter().all(|&p| p == 1.0)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pgm_binary_roundtrip() {
        let pixels: Vec<u8> = (0..784).map(|i| (i * 7 % 256) as u8).collect();
        let mut bytes = Vec::new();
        write_pgm(&mut bytes, &pixels, 28, 28).unwrap();
        assert_eq!(read_pgm(&bytes[..]).unwrap(), pixels);
    }

    #[test]
    fn test_pgm_ascii_with_comments_and_maxval() {
        let mut text = String::from("P2\n# digit\n28 28\n# scale\n15\n");
        for i in 0..784 {
            text.push_str(if i == 0 { "15 " } else { "0 " });
        }
        let pixels = read_pgm(text.as_bytes()).unwrap();
        assert_eq!(pixels[0], 255);
        assert!(pixels[1..].iter().all(|&p| p == 0));

        let image = image_from_pixels(&pixels, Normalization::UnitRange).unwrap();
        assert_eq!(image[[0, 0, 0]], 1.0);
    }

    #[test]
    fn test_pgm_rejects_bad_input() {
        assert!(matches!(read_pgm(&b"P6\n28 28\n255\n"[..]), Err(ModelError::InvalidFormat(_))));
        assert!(matches!(
            read_pgm(&b"P5\n32 32\n255\n"[..]),
            Err(ModelError::InvalidShape { .. })
        ));
        assert!(matches!(read_pgm(&b"P5\n28 28\n255\n\0\0"[..]), Err(ModelError::InvalidFormat(_))));
        assert!(image_from_pixels(&[0; 10], Normalization::Raw).is_err());
    }
}
