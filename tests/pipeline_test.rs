//! End-to-end tests for the offload pipeline.
//!
//! Tests that need a device return early when the host exposes no adapter.

use std::process::Command;

use offload::gpu::{bind_args, probe_devices, AccessMode, DeviceBuffer, KernelArg};
use offload::host::{elementwise_add_reference, random_array};
use offload::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const KERNEL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/vector_ops.wgsl");

fn adapter_available() -> bool {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let found = !probe_devices(&instance, wgpu::Backends::all()).is_empty();
    if !found {
        eprintln!("no adapter available, skipping");
    }
    found
}

fn config(elements: usize) -> Config {
    Config::builder()
        .elements(elements)
        .kernel_path(KERNEL)
        .seed(7)
        .build()
        .unwrap()
}

#[test]
fn test_output_matches_host_sum() {
    if !adapter_available() {
        return;
    }

    let n = 1 << 20;
    let pipeline = Pipeline::new(&config(n)).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let a = random_array(n, &mut rng);
    let b = random_array(n, &mut rng);

    let report = pipeline.run(&a, &b).unwrap();

    assert_eq!(report.output.len(), n);
    for i in 0..n {
        assert_eq!(report.output[i], a[i] + b[i], "mismatch at {}", i);
    }
    assert!(report.output.iter().all(|&v| (0..=198).contains(&v)));
    assert!(report.elapsed.as_millis_f64() >= 0.0);
    assert_eq!(pipeline.metrics().kernels_enqueued(), 1);
}

#[test]
fn test_length_not_multiple_of_workgroup() {
    if !adapter_available() {
        return;
    }

    let n = 1000;
    let pipeline = Pipeline::new(&config(n)).unwrap();
    let a: Vec<i32> = (0..n as i32).collect();
    let b = vec![1; n];

    let report = pipeline.run(&a, &b).unwrap();
    assert_eq!(report.output[0], 1);
    assert_eq!(report.output[n - 1], n as i32);
}

#[test]
#[ignore = "allocates 1.2 GB of device memory"]
fn test_default_element_count() {
    if !adapter_available() {
        return;
    }

    let cfg = Config::builder().kernel_path(KERNEL).verify(true).build().unwrap();
    let pipeline = Pipeline::new(&cfg).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let a = random_array(cfg.elements, &mut rng);
    let b = random_array(cfg.elements, &mut rng);

    let report = pipeline.run(&a, &b).unwrap();
    assert_eq!(report.output.len(), 100_000_000);
    assert!(report.output.iter().all(|&v| (0..=198).contains(&v)));
}

#[test]
fn test_domain_larger_than_binding_limit() {
    if !adapter_available() {
        return;
    }

    let pipeline = Pipeline::new(&config(16)).unwrap();
    let limits = pipeline.context().limits();
    let n = limits.max_storage_buffer_binding_size as usize / 4 + 1024;
    let bytes = n as u64 * 4;
    if bytes > limits.max_buffer_size || bytes > 1 << 30 {
        eprintln!("binding limit too large to cross cheaply, skipping");
        return;
    }

    let mut rng = StdRng::seed_from_u64(11);
    let a = random_array(n, &mut rng);
    let b = random_array(n, &mut rng);

    let report = pipeline.run(&a, &b).unwrap();

    assert!(report.windows >= 2);
    assert_eq!(pipeline.metrics().kernels_enqueued(), report.windows as u64);
    let expected = elementwise_add_reference(&a, &b);
    assert_eq!(report.output.len(), expected.len());
    for (i, (got, want)) in report.output.iter().zip(&expected).enumerate() {
        assert_eq!(got, want, "mismatch at {}", i);
    }
    assert!(report.output.iter().all(|&v| (0..=198).contains(&v)));
}

#[test]
fn test_binding_cap_splits_dispatch() {
    if !adapter_available() {
        return;
    }

    let cfg = Config::builder()
        .elements(10_000)
        .kernel_path(KERNEL)
        .max_binding_bytes(4096)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(&cfg).unwrap();
    let a: Vec<i32> = (0..10_000).collect();
    let b: Vec<i32> = (0..10_000).rev().collect();

    let report = pipeline.run(&a, &b).unwrap();

    assert_eq!(report.windows, 10);
    assert_eq!(pipeline.metrics().kernels_enqueued(), 10);
    assert!(report.output.iter().all(|&v| v == 9_999));
}

#[test]
fn test_invalid_kernel_source_reports_log() {
    if !adapter_available() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.wgsl");
    std::fs::write(&path, "@compute @workgroup_size(64) fn vector_add( {").unwrap();

    let cfg = Config::builder().elements(16).kernel_path(&path).build().unwrap();
    match Pipeline::new(&cfg) {
        Err(err @ Error::CompileFailed { .. }) => {
            assert!(!err.build_log().unwrap_or_default().is_empty());
            assert_eq!(err.stage(), "program build");
        }
        other => panic!("expected CompileFailed, got {:?}", other),
    }
}

#[test]
fn test_missing_kernel_source() {
    if !adapter_available() {
        return;
    }

    let cfg = Config::builder()
        .elements(16)
        .kernel_path("kernels/does_not_exist.wgsl")
        .build()
        .unwrap();
    assert!(matches!(
        Pipeline::new(&cfg),
        Err(Error::SourceNotFound { .. })
    ));
}

#[test]
fn test_unknown_entry_point() {
    if !adapter_available() {
        return;
    }

    let cfg = Config::builder()
        .elements(16)
        .kernel_path(KERNEL)
        .entry_point("vector_mul")
        .build()
        .unwrap();
    assert!(matches!(
        Pipeline::new(&cfg),
        Err(Error::EntryNotFound(_))
    ));
}

#[test]
fn test_bad_argument_blocks_dispatch() {
    if !adapter_available() {
        return;
    }

    let pipeline = Pipeline::new(&config(64)).unwrap();
    let ctx = pipeline.context();
    let a = DeviceBuffer::allocate(ctx, 256, AccessMode::ReadWrite).unwrap();
    let out = DeviceBuffer::allocate(ctx, 256, AccessMode::ReadWrite).unwrap();

    let result = bind_args(
        pipeline.kernel(),
        &[
            (0, KernelArg::U32(64)),
            (1, KernelArg::Buffer(&a)),
            (2, KernelArg::I32(5)),
            (3, KernelArg::Buffer(&out)),
        ],
    );

    match result {
        Err(Error::ArgBindingFailed(msg)) => assert!(msg.contains("argument 2"), "{}", msg),
        Err(other) => panic!("expected ArgBindingFailed, got {:?}", other),
        Ok(_) => panic!("binding a scalar to a buffer parameter succeeded"),
    }
    assert_eq!(pipeline.metrics().kernels_enqueued(), 0);
}

#[test]
fn test_mismatched_input_lengths() {
    if !adapter_available() {
        return;
    }

    let pipeline = Pipeline::new(&config(4)).unwrap();
    assert!(pipeline.run(&[1, 2, 3, 4], &[1, 2, 3]).is_err());
    assert_eq!(pipeline.metrics().kernels_enqueued(), 0);
}

#[test]
fn test_metrics_export() {
    if !adapter_available() {
        return;
    }

    let pipeline = Pipeline::new(&config(256)).unwrap();
    let data = vec![1; 256];
    pipeline.run(&data, &data).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    pipeline.export_metrics(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["kernels_enqueued"], 1);
}

#[test]
fn test_cli_previews_short_arrays_in_full() {
    let output = Command::new(env!("CARGO_BIN_EXE_offload"))
        .arg("10")
        .env("OFFLOAD_KERNEL_PATH", KERNEL)
        .env("OFFLOAD_SEED", "3")
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap();
    assert_eq!(first.split_whitespace().count(), 10);
    assert!(!first.contains("....."));
}

#[test]
fn test_cli_previews_long_arrays_with_ellipsis() {
    let output = Command::new(env!("CARGO_BIN_EXE_offload"))
        .arg("20")
        .env("OFFLOAD_KERNEL_PATH", KERNEL)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap();
    let (head, tail) = first.split_once(" ..... ").unwrap();
    assert_eq!(head.split_whitespace().count(), 5);
    assert_eq!(tail.split_whitespace().count(), 5);
    assert!(stdout.contains("----------------------------"));
}

#[test]
fn test_cli_exits_nonzero_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.wgsl");
    std::fs::write(&path, "not a shader").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_offload"))
        .arg("16")
        .env("OFFLOAD_KERNEL_PATH", &path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error during"), "{}", stderr);
}
