//! End-to-end container loading tests
//!
//! Each test writes a synthetic GGUF byte stream (and, for the mmap path, a
//! real temp file) and checks what the loader accepts, rejects, and computes.

use std::io::Write as _;

use inferir::gguf::{GGUFModel, GGUFValue, MappedGGUFModel, QuantType};
use inferir::InferirError;

const ALIGNMENT: usize = 32;

// ============================================================================
// Container builder helpers
// ============================================================================

fn push_string(data: &mut Vec<u8>, s: &str) {
    data.extend_from_slice(&(s.len() as u64).to_le_bytes());
    data.extend_from_slice(s.as_bytes());
}

fn push_header(data: &mut Vec<u8>, version: u32, tensors: u64, metadata: u64) {
    data.extend_from_slice(b"GGUF");
    data.extend_from_slice(&version.to_le_bytes());
    data.extend_from_slice(&tensors.to_le_bytes());
    data.extend_from_slice(&metadata.to_le_bytes());
}

fn push_kv_u32(data: &mut Vec<u8>, key: &str, value: u32) {
    push_string(data, key);
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(&value.to_le_bytes());
}

fn push_descriptor(data: &mut Vec<u8>, name: &str, dims: &[u64], qtype: QuantType, offset: u64) {
    push_string(data, name);
    data.extend_from_slice(&(dims.len() as u32).to_le_bytes());
    for &d in dims {
        data.extend_from_slice(&d.to_le_bytes());
    }
    data.extend_from_slice(&qtype.tag().to_le_bytes());
    data.extend_from_slice(&offset.to_le_bytes());
}

fn pad_to_alignment(data: &mut Vec<u8>, alignment: usize) {
    while data.len() % alignment != 0 {
        data.push(0);
    }
}

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

// ============================================================================
// Header round-trip
// ============================================================================

#[test]
fn header_fields_survive_parsing_exactly() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 2, 1);
    push_kv_u32(&mut data, "general.quantization_version", 2);
    push_descriptor(&mut data, "a", &[8], QuantType::F32, 0);
    push_descriptor(&mut data, "b", &[8], QuantType::F32, 32);

    let model = GGUFModel::from_bytes(&data).unwrap();
    assert_eq!(&model.header.magic.to_le_bytes(), b"GGUF");
    assert_eq!(model.header.version, 3);
    assert_eq!(model.header.tensor_count, 2);
    assert_eq!(model.header.metadata_kv_count, 1);
    assert_eq!(
        model.metadata_value("general.quantization_version"),
        Some(&GGUFValue::UInt32(2))
    );
}

#[test]
fn magic_mismatch_yields_format_error_and_no_tensors() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 1, 0);
    data[0..4].copy_from_slice(b"FUGG");
    push_descriptor(&mut data, "t", &[4], QuantType::F32, 0);

    let err = GGUFModel::from_bytes(&data).unwrap_err();
    assert!(matches!(err, InferirError::FormatError { .. }));
    // All-or-nothing: the failed load exposes no partial model to query
}

// ============================================================================
// Alignment and the tensor-data origin
// ============================================================================

#[test]
fn three_tensor_origin_rounds_up_to_alignment() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 3, 0);
    push_descriptor(&mut data, "first", &[16], QuantType::F32, 0);
    push_descriptor(&mut data, "second", &[16], QuantType::F32, 64);
    push_descriptor(&mut data, "third", &[32, 2], QuantType::Q8_0, 128);
    let descriptor_end = data.len();

    let model = GGUFModel::from_bytes(&data).unwrap();
    assert_eq!(model.alignment(), ALIGNMENT);
    assert_eq!(
        model.tensor_data_start(),
        descriptor_end.div_ceil(ALIGNMENT) * ALIGNMENT
    );

    // The invariant holds for every parsed descriptor
    for tensor in &model.tensors {
        assert_eq!(tensor.offset % ALIGNMENT as u64, 0, "{}", tensor.name);
    }
}

#[test]
fn alignment_override_governs_offset_checks() {
    // alignment 16: offset 48 is legal even though 48 % 32 != 0 under the
    // default
    let mut data = Vec::new();
    push_header(&mut data, 3, 1, 1);
    push_kv_u32(&mut data, "general.alignment", 16);
    push_descriptor(&mut data, "t", &[4], QuantType::F32, 48);

    let model = GGUFModel::from_bytes(&data).unwrap();
    assert_eq!(model.alignment(), 16);
    assert_eq!(model.tensor("t").unwrap().offset, 48);
    assert_eq!(model.tensor_data_start() % 16, 0);
}

#[test]
fn misaligned_offset_is_fatal() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 1, 0);
    push_descriptor(&mut data, "t", &[4], QuantType::F32, 17);

    let err = GGUFModel::from_bytes(&data).unwrap_err();
    assert!(matches!(err, InferirError::FormatError { .. }));
}

#[test]
fn non_power_of_two_alignment_is_fatal() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 0, 1);
    push_kv_u32(&mut data, "general.alignment", 24);

    let err = GGUFModel::from_bytes(&data).unwrap_err();
    assert!(err.to_string().contains("power of two"));
}

// ============================================================================
// Memory-mapped payload access
// ============================================================================

/// Container with two tensors: an f32 ramp and one q8_0 block, payload
/// included
fn two_tensor_container() -> Vec<u8> {
    let f32_values: Vec<f32> = (0..8).map(|i| i as f32 * 0.5).collect();
    let f32_bytes = QuantType::F32.byte_size(8); // 32

    let mut data = Vec::new();
    push_header(&mut data, 3, 2, 0);
    push_descriptor(&mut data, "ramp", &[8], QuantType::F32, 0);
    push_descriptor(&mut data, "quant", &[32], QuantType::Q8_0, f32_bytes as u64);
    pad_to_alignment(&mut data, ALIGNMENT);

    for v in &f32_values {
        data.extend_from_slice(&v.to_le_bytes());
    }
    // One q8_0 block: scale 0.5, codes 0..32
    data.extend_from_slice(&half::f16::from_f32(0.5).to_le_bytes());
    for code in 0..32u8 {
        data.push(code);
    }
    data
}

#[test]
fn mapped_views_read_payload_in_place() {
    let file = write_temp(&two_tensor_container());
    let mapped = MappedGGUFModel::open(file.path()).unwrap();

    let ramp = mapped.tensor_view("ramp").unwrap();
    assert_eq!(ramp.qtype(), QuantType::F32);
    assert_eq!(ramp.len(), 8);

    let quant = mapped.tensor_view("quant").unwrap();
    assert_eq!(quant.qtype(), QuantType::Q8_0);
    assert_eq!(quant.bytes().len(), 34);

    // Dequantized q8_0 elements: scale * code
    let tensor = inferir::QuantizedTensor::from_view(quant);
    assert!((tensor.get(0) - 0.0).abs() < 1e-3);
    assert!((tensor.get(10) - 5.0).abs() < 1e-2);
    assert!((tensor.get(31) - 15.5).abs() < 1e-2);
}

#[test]
fn view_range_beyond_file_is_fatal() {
    let mut bytes = two_tensor_container();
    bytes.truncate(bytes.len() - 10);
    let file = write_temp(&bytes);

    let mapped = MappedGGUFModel::open(file.path()).unwrap();
    // The first tensor still fits; the second runs past the end
    assert!(mapped.tensor_view("ramp").is_ok());
    let err = mapped.tensor_view("quant").unwrap_err();
    assert!(matches!(err, InferirError::FormatError { .. }));
}

#[test]
fn views_share_one_mapping() {
    let file = write_temp(&two_tensor_container());
    let mapped = MappedGGUFModel::open(file.path()).unwrap();

    let a = mapped.tensor_view("ramp").unwrap();
    let b = mapped.tensor_view("ramp").unwrap();
    assert_eq!(a.bytes().as_ptr(), b.bytes().as_ptr());

    let origin = mapped.data().as_ptr() as usize + mapped.model.tensor_data_start();
    assert_eq!(a.bytes().as_ptr() as usize, origin);
}

// ============================================================================
// Metadata shapes
// ============================================================================

#[test]
fn nested_arrays_parse_to_nested_values() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 0, 1);
    push_string(&mut data, "custom.matrix");
    data.extend_from_slice(&9u32.to_le_bytes()); // array
    data.extend_from_slice(&9u32.to_le_bytes()); // of arrays
    data.extend_from_slice(&2u64.to_le_bytes());
    for row in [[1u32, 2], [3, 4]] {
        data.extend_from_slice(&4u32.to_le_bytes()); // of u32
        data.extend_from_slice(&2u64.to_le_bytes());
        for v in row {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }

    let model = GGUFModel::from_bytes(&data).unwrap();
    let rows = model
        .metadata_value("custom.matrix")
        .and_then(GGUFValue::as_array)
        .unwrap();
    assert_eq!(rows.len(), 2);
    let second = rows[1].as_array().unwrap();
    assert_eq!(second[0].as_u64(), Some(3));
    assert_eq!(second[1].as_u64(), Some(4));
}

#[test]
fn short_metadata_stream_is_io_failure() {
    let mut data = Vec::new();
    push_header(&mut data, 3, 0, 1);
    push_string(&mut data, "general.name");
    data.extend_from_slice(&8u32.to_le_bytes());
    data.extend_from_slice(&100u64.to_le_bytes()); // string length past EOF

    let err = GGUFModel::from_bytes(&data).unwrap_err();
    assert!(matches!(err, InferirError::IoError { .. }));
}
