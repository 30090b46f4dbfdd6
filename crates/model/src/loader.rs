//! Model weight loading
//!
//! Three on-disk formats are understood:
//!
//! - raw: little-endian f32, the eight tensors concatenated in canonical
//!   layout and [`TENSOR_NAMES`] order
//! - safetensors: one tensor per canonical name, F32 or BF16
//! - Keras JSON: `{layer: {"kernel": [...], "bias": [...]}}` as dumped from a
//!   trained `Sequential` model, permuted here into canonical layout

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use half::bf16;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{
    CONV1_DIM, CONV1_OUT, CONV2_DIM, CONV2_OUT, FC1_IN, FC1_OUT, FC2_OUT, IMG_DEPTH,
    POOL2_HEIGHT, POOL2_WIDTH,
};
use crate::error::{ModelError, Result};
use crate::weights::{FloatParams, TENSOR_NAMES, TENSOR_SHAPES};

/// Keras layer names, one per weighted layer
const KERAS_LAYERS: [&str; 4] = ["conv2d", "conv2d_1", "dense", "dense_1"];

/// On-disk weight format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Raw,
    Safetensors,
    KerasJson,
}

impl WeightFormat {
    /// Detect the format from a file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("raw") | Some("bin") => Ok(Self::Raw),
            Some("safetensors") => Ok(Self::Safetensors),
            Some("json") => Ok(Self::KerasJson),
            _ => Err(ModelError::InvalidFormat(format!(
                "cannot infer weight format from {}",
                path.display()
            ))),
        }
    }
}

/// Load weights, detecting the format from the extension
pub fn load_weights<P: AsRef<Path>>(path: P) -> Result<FloatParams> {
    let path = path.as_ref();
    let format = WeightFormat::from_path(path)?;
    info!(path = %path.display(), ?format, "Loading weights");
    match format {
        WeightFormat::Raw => load_raw(path),
        WeightFormat::Safetensors => load_safetensors(path),
        WeightFormat::KerasJson => load_keras_json(path),
    }
}

/// Save weights in the format implied by the extension.
///
/// Keras JSON is input-only.
pub fn save_weights<P: AsRef<Path>>(params: &FloatParams, path: P) -> Result<()> {
    let path = path.as_ref();
    match WeightFormat::from_path(path)? {
        WeightFormat::Raw => save_raw(params, path),
        WeightFormat::Safetensors => save_safetensors(params, path),
        WeightFormat::KerasJson => Err(ModelError::InvalidFormat(
            "Keras JSON output is not supported".to_string(),
        )),
    }
}

// ============================================================================
// Raw
// ============================================================================

/// Read the raw format. The stream must hold exactly one parameter set.
pub fn read_raw<R: Read>(mut reader: R) -> Result<FloatParams> {
    let mut tensors: [Vec<f32>; 8] = Default::default();
    for ((buf, name), shape) in tensors.iter_mut().zip(TENSOR_NAMES).zip(TENSOR_SHAPES) {
        buf.resize(shape.iter().product(), 0.0);
        reader
            .read_f32_into::<LittleEndian>(buf)
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => {
                    ModelError::InvalidFormat(format!("raw weights truncated in {}", name))
                }
                _ => ModelError::Io(e),
            })?;
    }

    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(ModelError::InvalidFormat(
            "trailing bytes after raw weights".to_string(),
        ));
    }

    FloatParams::from_flat(tensors)
}

pub fn write_raw<W: Write>(params: &FloatParams, mut writer: W) -> Result<()> {
    for (_, data) in params.tensors() {
        for &v in data {
            writer.write_f32::<LittleEndian>(v)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn load_raw<P: AsRef<Path>>(path: P) -> Result<FloatParams> {
    read_raw(BufReader::new(File::open(path)?))
}

pub fn save_raw<P: AsRef<Path>>(params: &FloatParams, path: P) -> Result<()> {
    write_raw(params, BufWriter::new(File::create(path)?))
}

// ============================================================================
// Safetensors
// ============================================================================

/// Decode one tensor as f32 values
fn tensor_f32(view: &TensorView<'_>) -> Result<Vec<f32>> {
    let data = view.data();
    match view.dtype() {
        Dtype::F32 => Ok(data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        Dtype::BF16 => Ok(data
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect()),
        dtype => Err(ModelError::InvalidDtype {
            expected: "F32 or BF16".to_string(),
            got: format!("{:?}", dtype),
        }),
    }
}

/// Whether a stored shape is acceptable for a canonical tensor
fn shape_matches(index: usize, shape: &[usize]) -> bool {
    let canonical = TENSOR_SHAPES[index];
    if shape == canonical {
        return true;
    }
    // fc1 may keep the unflattened [out, C, H, W] view of its input
    TENSOR_NAMES[index] == "fc1.weight" && shape == [FC1_OUT, CONV2_OUT, POOL2_HEIGHT, POOL2_WIDTH]
}

pub fn from_safetensors_bytes(bytes: &[u8]) -> Result<FloatParams> {
    let tensors =
        SafeTensors::deserialize(bytes).map_err(|e| ModelError::Safetensors(e.to_string()))?;

    let mut flat: [Vec<f32>; 8] = Default::default();
    for (index, (slot, name)) in flat.iter_mut().zip(TENSOR_NAMES).enumerate() {
        let view = tensors
            .tensor(name)
            .map_err(|_| ModelError::MissingTensor(name.to_string()))?;
        if !shape_matches(index, view.shape()) {
            return Err(ModelError::InvalidShape {
                tensor: name.to_string(),
                expected: TENSOR_SHAPES[index].to_vec(),
                got: view.shape().to_vec(),
            });
        }
        debug!(tensor = name, shape = ?view.shape(), dtype = ?view.dtype(), "Loaded tensor");
        *slot = tensor_f32(&view)?;
    }

    FloatParams::from_flat(flat)
}

pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<FloatParams> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    from_safetensors_bytes(&data)
}

/// Serialize as F32 safetensors with canonical names and shapes
pub fn to_safetensors_bytes(params: &FloatParams) -> Result<Vec<u8>> {
    let buffers: Vec<Vec<u8>> = params
        .tensors()
        .iter()
        .map(|(_, data)| data.iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();

    let views = TENSOR_NAMES
        .iter()
        .zip(TENSOR_SHAPES)
        .zip(&buffers)
        .map(|((&name, shape), bytes)| {
            TensorView::new(Dtype::F32, shape.to_vec(), bytes)
                .map(|view| (name.to_string(), view))
                .map_err(|e| ModelError::Safetensors(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize(views, &None).map_err(|e| ModelError::Safetensors(e.to_string()))
}

pub fn save_safetensors<P: AsRef<Path>>(params: &FloatParams, path: P) -> Result<()> {
    let bytes = to_safetensors_bytes(params)?;
    File::create(path)?.write_all(&bytes)?;
    Ok(())
}

// ============================================================================
// Keras JSON
// ============================================================================

/// Flatten arbitrarily nested JSON arrays of numbers
fn collect_numbers(value: &Value, out: &mut Vec<f32>, field: &str) -> Result<()> {
    match value {
        Value::Number(n) => {
            let v = n
                .as_f64()
                .ok_or_else(|| ModelError::InvalidFormat(format!("{}: bad number {}", field, n)))?;
            out.push(v as f32);
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(|v| collect_numbers(v, out, field)),
        other => Err(ModelError::InvalidFormat(format!(
            "{}: expected numbers, found {}",
            field, other
        ))),
    }
}

fn keras_field(root: &Value, layer: &str, field: &str, expected_len: usize) -> Result<Vec<f32>> {
    let name = format!("{}.{}", layer, field);
    let value = root
        .get(layer)
        .and_then(|l| l.get(field))
        .ok_or_else(|| ModelError::MissingTensor(name.clone()))?;

    let mut out = Vec::with_capacity(expected_len);
    collect_numbers(value, &mut out, &name)?;
    if out.len() != expected_len {
        return Err(ModelError::InvalidShape {
            tensor: name,
            expected: vec![expected_len],
            got: vec![out.len()],
        });
    }
    Ok(out)
}

/// `[K, K, CIN, COUT]` → `[COUT, CIN, K, K]`
fn permute_conv_kernel(keras: &[f32], cout: usize, cin: usize, k: usize) -> Vec<f32> {
    let mut out = vec![0.0; keras.len()];
    for f in 0..cout {
        for c in 0..cin {
            for ky in 0..k {
                for kx in 0..k {
                    out[((f * cin + c) * k + ky) * k + kx] = keras[((ky * k + kx) * cin + c) * cout + f];
                }
            }
        }
    }
    out
}

/// `[IN, OUT]` → `[OUT, IN]`
fn transpose_dense(keras: &[f32], inputs: usize, outputs: usize) -> Vec<f32> {
    let mut out = vec![0.0; keras.len()];
    for n in 0..outputs {
        for i in 0..inputs {
            out[n * inputs + i] = keras[i * outputs + n];
        }
    }
    out
}

/// FC1 from Keras: rows follow Flatten over `[H, W, C]`, canonical columns
/// follow `[C, H, W]`
fn permute_fc1(keras: &[f32]) -> Vec<f32> {
    let (channels, height, width) = (CONV2_OUT, POOL2_HEIGHT, POOL2_WIDTH);
    let mut out = vec![0.0; keras.len()];
    for n in 0..FC1_OUT {
        for c in 0..channels {
            for h in 0..height {
                for w in 0..width {
                    let keras_in = (h * width + w) * channels + c;
                    let column = (c * height + h) * width + w;
                    out[n * FC1_IN + column] = keras[keras_in * FC1_OUT + n];
                }
            }
        }
    }
    out
}

pub fn from_keras_json(json: &str) -> Result<FloatParams> {
    let root: Value = serde_json::from_str(json)?;
    let len = |i: usize| TENSOR_SHAPES[i].iter().product::<usize>();

    let conv1 = keras_field(&root, KERAS_LAYERS[0], "kernel", len(0))?;
    let conv2 = keras_field(&root, KERAS_LAYERS[1], "kernel", len(2))?;
    let fc1 = keras_field(&root, KERAS_LAYERS[2], "kernel", len(4))?;
    let fc2 = keras_field(&root, KERAS_LAYERS[3], "kernel", len(6))?;

    FloatParams::from_flat([
        permute_conv_kernel(&conv1, CONV1_OUT, IMG_DEPTH, CONV1_DIM),
        keras_field(&root, KERAS_LAYERS[0], "bias", len(1))?,
        permute_conv_kernel(&conv2, CONV2_OUT, CONV1_OUT, CONV2_DIM),
        keras_field(&root, KERAS_LAYERS[1], "bias", len(3))?,
        permute_fc1(&fc1),
        keras_field(&root, KERAS_LAYERS[2], "bias", len(5))?,
        transpose_dense(&fc2, FC1_OUT, FC2_OUT),
        keras_field(&root, KERAS_LAYERS[3], "bias", len(7))?,
    ])
}

pub fn load_keras_json<P: AsRef<Path>>(path: P) -> Result<FloatParams> {
    let mut json = String::new();
    File::open(path)?.read_to_string(&mut json)?;
    from_keras_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("qlenet-loader-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(WeightFormat::from_path("w.raw").unwrap(), WeightFormat::Raw);
        assert_eq!(WeightFormat::from_path("w.BIN").unwrap(), WeightFormat::Raw);
        assert_eq!(
            WeightFormat::from_path("dir/w.safetensors").unwrap(),
            WeightFormat::Safetensors
        );
        assert_eq!(WeightFormat::from_path("poids.json").unwrap(), WeightFormat::KerasJson);
        assert!(matches!(
            WeightFormat::from_path("weights.h5"),
            Err(ModelError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_raw_file_roundtrip() {
        let params = FloatParams::random(&mut ChaCha8Rng::seed_from_u64(21));
        let path = temp_path("roundtrip.raw");
        save_weights(&params, &path).unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size as usize, FloatParams::PARAMETER_COUNT * 4);
        assert_eq!(load_weights(&path).unwrap(), params);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_raw_rejects_truncated_and_trailing() {
        let params = FloatParams::random(&mut ChaCha8Rng::seed_from_u64(22));
        let mut bytes = Vec::new();
        write_raw(&params, &mut bytes).unwrap();

        let truncated = &bytes[..bytes.len() - 4];
        match read_raw(truncated) {
            Err(ModelError::InvalidFormat(msg)) => assert!(msg.contains("fc2.bias"), "{}", msg),
            other => panic!("expected InvalidFormat, got {:?}", other.map(|_| ())),
        }

        bytes.push(0);
        assert!(matches!(read_raw(&bytes[..]), Err(ModelError::InvalidFormat(_))));
    }

    #[test]
    fn test_safetensors_roundtrip() {
        let params = FloatParams::random(&mut ChaCha8Rng::seed_from_u64(23));
        let path = temp_path("roundtrip.safetensors");
        save_weights(&params, &path).unwrap();
        assert_eq!(load_weights(&path).unwrap(), params);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_safetensors_bf16_and_4d_fc1() {
        let mut params = FloatParams::zeros();
        params.fc1_weight =
            crate::config::Fc1Weight::from_fn(|[n, i]| if n == 3 && i == 17 { 1.5 } else { 0.0 });
        params.fc2_bias = crate::config::Scores::filled(-0.25);

        let buffers: Vec<Vec<u8>> = params
            .tensors()
            .iter()
            .map(|(_, data)| data.iter().flat_map(|v| bf16::from_f32(*v).to_le_bytes()).collect())
            .collect();
        let views: Vec<(String, TensorView<'_>)> = TENSOR_NAMES
            .iter()
            .zip(TENSOR_SHAPES)
            .zip(&buffers)
            .map(|((&name, shape), bytes)| {
                let shape = if name == "fc1.weight" {
                    vec![FC1_OUT, CONV2_OUT, POOL2_HEIGHT, POOL2_WIDTH]
                } else {
                    shape.to_vec()
                };
                (name.to_string(), TensorView::new(Dtype::BF16, shape, bytes).unwrap())
            })
            .collect();
        let bytes = safetensors::serialize(views, &None).unwrap();

        let loaded = from_safetensors_bytes(&bytes).unwrap();
        assert_eq!(loaded.fc1_weight[[3, 17]], 1.5);
        assert_eq!(loaded.fc2_bias[9], -0.25);
    }

    #[test]
    fn test_safetensors_shape_and_missing_errors() {
        let params = FloatParams::zeros();
        let buffers: Vec<Vec<u8>> = params
            .tensors()
            .iter()
            .map(|(_, data)| data.iter().flat_map(|v| v.to_le_bytes()).collect())
            .collect();

        // conv1.weight stored as [20, 25]
        let views: Vec<(String, TensorView<'_>)> = TENSOR_NAMES
            .iter()
            .zip(TENSOR_SHAPES)
            .zip(&buffers)
            .map(|((&name, shape), bytes)| {
                let shape = if name == "conv1.weight" { vec![20, 25] } else { shape.to_vec() };
                (name.to_string(), TensorView::new(Dtype::F32, shape, bytes).unwrap())
            })
            .collect();
        let bytes = safetensors::serialize(views, &None).unwrap();
        match from_safetensors_bytes(&bytes) {
            Err(ModelError::InvalidShape { tensor, got, .. }) => {
                assert_eq!(tensor, "conv1.weight");
                assert_eq!(got, vec![20, 25]);
            }
            other => panic!("expected InvalidShape, got {:?}", other.map(|_| ())),
        }

        let views: Vec<(String, TensorView<'_>)> = TENSOR_NAMES
            .iter()
            .zip(TENSOR_SHAPES)
            .zip(&buffers)
            .filter(|((name, _), _)| **name != "fc2.bias")
            .map(|((&name, shape), bytes)| {
                (name.to_string(), TensorView::new(Dtype::F32, shape.to_vec(), bytes).unwrap())
            })
            .collect();
        let bytes = safetensors::serialize(views, &None).unwrap();
        assert!(matches!(
            from_safetensors_bytes(&bytes),
            Err(ModelError::MissingTensor(name)) if name == "fc2.bias"
        ));
    }

    fn keras_zeros() -> Value {
        json!({
            "conv2d": {"kernel": vec![0.0; 500], "bias": vec![0.0; 20]},
            "conv2d_1": {"kernel": vec![0.0; 20_000], "bias": vec![0.0; 40]},
            "dense": {"kernel": vec![0.0; 256_000], "bias": vec![0.0; 400]},
            "dense_1": {"kernel": vec![0.0; 4_000], "bias": vec![0.0; 10]},
        })
    }

    #[test]
    fn test_keras_conv_permutation() {
        let mut root = keras_zeros();
        // kernel[ky=1][kx=3][c=7][f=11]
        let keras_index = ((1 * 5 + 3) * 20 + 7) * 40 + 11;
        root["conv2d_1"]["kernel"][keras_index] = json!(0.5);
        root["conv2d"]["bias"][4] = json!(-1.0);

        let params = from_keras_json(&root.to_string()).unwrap();
        assert_eq!(params.conv2_kernel[[11, 7, 1, 3]], 0.5);
        assert_eq!(params.conv2_kernel.iter().filter(|&&v| v != 0.0).count(), 1);
        assert_eq!(params.conv1_bias[4], -1.0);
    }

    #[test]
    fn test_keras_dense_permutation() {
        let mut root = keras_zeros();
        // Flatten over [h=2, w=1, c=5] feeding unit 123
        let keras_in = (2 * 4 + 1) * 40 + 5;
        root["dense"]["kernel"][keras_in * 400 + 123] = json!(2.0);
        // dense_1 input 7 → class 9
        root["dense_1"]["kernel"][7 * 10 + 9] = json!(-3.0);

        let params = from_keras_json(&root.to_string()).unwrap();
        let column = (5 * 4 + 2) * 4 + 1;
        assert_eq!(params.fc1_weight[[123, column]], 2.0);
        assert_eq!(params.fc1_weight.iter().filter(|&&v| v != 0.0).count(), 1);
        assert_eq!(params.fc2_weight[[9, 7]], -3.0);
    }

    #[test]
    fn test_keras_accepts_nested_arrays() {
        let mut root = keras_zeros();
        let nested: Vec<Vec<f32>> = (0..400)
            .map(|i| (0..10).map(|n| if i == 7 && n == 9 { -3.0 } else { 0.0 }).collect())
            .collect();
        root["dense_1"]["kernel"] = json!(nested);

        let params = from_keras_json(&root.to_string()).unwrap();
        assert_eq!(params.fc2_weight[[9, 7]], -3.0);
    }

    #[test]
    fn test_keras_errors() {
        let mut root = keras_zeros();
        root.as_object_mut().unwrap().remove("dense_1");
        assert!(matches!(
            from_keras_json(&root.to_string()),
            Err(ModelError::MissingTensor(name)) if name == "dense_1.kernel"
        ));

        let mut root = keras_zeros();
        root["conv2d"]["bias"] = json!([0.0, 1.0]);
        assert!(matches!(
            from_keras_json(&root.to_string()),
            Err(ModelError::InvalidShape { .. })
        ));

        assert!(matches!(from_keras_json("{not json"), Err(ModelError::Json(_))));
    }
}
