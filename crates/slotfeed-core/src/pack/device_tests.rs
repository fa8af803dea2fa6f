//! Tests for `device` module.

use super::device::*;

#[test]
fn test_tensor_grows_only_when_needed() {
    // Arrange
    let mut tensor = DeviceTensor::<u64>::new();

    // Act
    tensor.resize(8);
    tensor.resize(4);
    tensor.resize(8);
    tensor.resize(16);

    // Assert
    assert_eq!(tensor.len(), 16);
    assert_eq!(tensor.capacity(), 16);
    assert_eq!(tensor.grow_count(), 2);
}

#[test]
fn test_shrinking_keeps_allocation() {
    let mut tensor = DeviceTensor::<f32>::new();
    tensor.resize(10);

    tensor.resize(0);

    assert!(tensor.is_empty());
    assert_eq!(tensor.capacity(), 10);
    assert!(tensor.as_slice().is_empty());
}

#[test]
fn test_host_device_upload_copies_and_counts() {
    // Arrange
    let mut device = HostDevice::new(3);
    let mut tensor = DeviceTensor::new();

    // Act
    device.upload(&[1u64, 2, 3], &mut tensor).expect("upload");
    device.upload(&[9u64], &mut tensor).expect("upload");
    device.synchronize().expect("sync");

    // Assert
    assert_eq!(tensor.as_slice(), &[9]);
    assert_eq!(device.id(), 3);
    assert_eq!(device.transfers(), 2);
    assert_eq!(device.bytes(), 32);
    assert_eq!(device.syncs(), 1);
}

#[test]
fn test_empty_upload_yields_valid_empty_tensor() {
    let mut device = HostDevice::new(0);
    let mut tensor = DeviceTensor::<i32>::new();

    device.upload(&[], &mut tensor).expect("upload");

    assert!(tensor.is_empty());
    assert_eq!(device.bytes(), 0);
}
