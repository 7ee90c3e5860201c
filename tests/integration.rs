//! End-to-end tests: a client talking to an in-process worker over TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use hipwire::worker::{SimulatedRuntime, SimulatedSmi, Worker, WorkerConfig};
use hipwire::{ArgCount, ClientConfig, HipError, LaunchConfig, RemoteGpu, SmiStatus};

/// A running worker; stops when dropped.
struct TestWorker {
    port: u16,
    runtime: Arc<SimulatedRuntime>,
    _stop: oneshot::Sender<()>,
}

impl TestWorker {
    async fn start(runtime: SimulatedRuntime) -> Self {
        let config = WorkerConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let worker = Worker::bind(config, runtime, SimulatedSmi::new(2)).await.unwrap();
        let port = worker.local_addr().unwrap().port();
        let runtime = worker.runtime().clone();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(worker.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            port,
            runtime,
            _stop: stop,
        }
    }

    fn client(&self) -> RemoteGpu {
        RemoteGpu::new(
            ClientConfig::builder()
                .host("127.0.0.1")
                .port(self.port)
                .io_timeout(Duration::from_secs(5))
                .build(),
        )
    }
}

/// Minimal ELF64 code object with one zeroed section header.
fn code_object() -> Vec<u8> {
    let mut image = vec![0u8; 128];
    image[..4].copy_from_slice(b"\x7fELF");
    image[4] = 2;
    image[5] = 1;
    image[40..48].copy_from_slice(&64u64.to_le_bytes());
    image[58..60].copy_from_slice(&64u16.to_le_bytes());
    image[60..62].copy_from_slice(&1u16.to_le_bytes());
    image
}

#[tokio::test]
async fn test_device_queries() {
    let worker = TestWorker::start(SimulatedRuntime::new(2)).await;
    let gpu = worker.client();

    assert_eq!(gpu.get_device_count().await.unwrap(), 2);
    gpu.set_device(1).await.unwrap();
    assert_eq!(gpu.get_device().await.unwrap(), 1);
    assert_eq!(gpu.set_device(5).await, Err(HipError::InvalidDevice));
    assert!(gpu.runtime_get_version().await.unwrap() > 0);
    assert_eq!(gpu.get_error_name(HipError::InvalidValue.code()), "hipErrorInvalidValue");
}

#[tokio::test]
async fn test_alloc_copy_free() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let ptr = gpu.malloc(data.len()).await.unwrap();
    assert_ne!(ptr, 0);
    gpu.memcpy_htod(ptr, &data).await.unwrap();

    let mut out = vec![0u8; data.len()];
    gpu.memcpy_dtoh(&mut out, ptr).await.unwrap();
    assert_eq!(out, data);

    gpu.free(ptr).await.unwrap();
    let mut stale = [0u8; 8];
    assert_eq!(gpu.memcpy_dtoh(&mut stale, ptr).await, Err(HipError::InvalidDevicePointer));
    gpu.device_synchronize().await.unwrap();
}

#[tokio::test]
async fn test_fire_and_forget_is_coalesced_and_ordered() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    let ptr = gpu.malloc(64).await.unwrap();
    for value in 1..=8u8 {
        gpu.memset_d8(ptr, value, 64).await.unwrap();
    }
    assert!(gpu.session().pending_bytes().await > 0);

    let mut out = [0u8; 64];
    gpu.memcpy_dtoh(&mut out, ptr).await.unwrap();
    assert_eq!(out, [8u8; 64]);
    assert_eq!(gpu.session().pending_bytes().await, 0);
}

#[tokio::test]
async fn test_deferred_error_surfaces_at_synchronize() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    let ptr = gpu.malloc(16).await.unwrap();
    gpu.free(ptr).await.unwrap();
    gpu.free(ptr).await.unwrap();
    gpu.memset(0xdead_0000, 0, 4).await.unwrap();

    assert_eq!(gpu.device_synchronize().await, Err(HipError::InvalidDevicePointer));
    gpu.device_synchronize().await.unwrap();
}

#[tokio::test]
async fn test_peek_keeps_deferred_error() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    gpu.free(0x1234).await.unwrap();
    assert_eq!(gpu.peek_at_last_error().await, Err(HipError::InvalidDevicePointer));
    assert_eq!(gpu.get_last_error().await, Err(HipError::InvalidDevicePointer));
    gpu.get_last_error().await.unwrap();
}

#[tokio::test]
async fn test_kernel_arguments_marshaled_for_every_count() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    let module = gpu.module_load_data(&code_object()).await.unwrap();
    let function = gpu.module_get_function(module, "record_args").await.unwrap();
    assert_eq!(gpu.function_arg_count(function), Some(ArgCount::Unknown));

    let config = LaunchConfig::new(1u32, 32u32);
    let values: Vec<[u8; 8]> = (0..64u64).map(|i| (i * 3 + 1).to_le_bytes()).collect();
    for count in 0..=64usize {
        let mut params: Vec<Option<&[u8]>> = values[..count].iter().map(|v| Some(&v[..])).collect();
        params.push(None);
        gpu.launch_kernel(function, &config, &params).await.unwrap();
    }
    gpu.device_synchronize().await.unwrap();

    let launches = worker.runtime.launches();
    assert_eq!(launches.len(), 65);
    for (count, launch) in launches.iter().enumerate() {
        assert_eq!(launch.kernel, "record_args");
        assert_eq!(launch.args.len(), count);
        for (arg, expected) in launch.args.iter().zip(&values) {
            assert_eq!(&arg[..], &expected[..]);
        }
    }
}

#[tokio::test]
async fn test_kernel_with_known_arity_runs() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    let module = gpu.module_load_data(&code_object()).await.unwrap();
    let fill = gpu.module_get_function(module, "fill_u32").await.unwrap();
    assert_eq!(gpu.function_arg_count(fill), Some(ArgCount::Known(3)));

    let ptr = gpu.malloc(16).await.unwrap();
    let (p, v, n) = (ptr.to_le_bytes(), 0xabcd_0123u32.to_le_bytes(), 4u32.to_le_bytes());
    gpu.launch_kernel(fill, &LaunchConfig::new(1u32, 4u32), &[Some(&p[..]), Some(&v[..]), Some(&n[..])])
        .await
        .unwrap();

    let mut out = [0u8; 16];
    gpu.memcpy_dtoh(&mut out, ptr).await.unwrap();
    for word in out.chunks(4) {
        assert_eq!(word, &v[..]);
    }

    let fail = gpu.module_get_function(module, "fail").await.unwrap();
    gpu.launch_kernel(fail, &LaunchConfig::new(1u32, 1u32), &[]).await.unwrap();
    assert_eq!(gpu.device_synchronize().await, Err(HipError::LaunchFailure));

    gpu.module_unload(module).await.unwrap();
    assert_eq!(gpu.function_arg_count(fill), None);
}

#[tokio::test]
async fn test_invalid_code_object_rejected_locally() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();
    assert_eq!(gpu.module_load_data(b"not a code object").await, Err(HipError::InvalidImage));
}

#[tokio::test]
async fn test_stream_and_event_handles() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    let stream = gpu.stream_create_with_priority(0, -1).await.unwrap();
    assert_eq!(gpu.stream_get_priority(stream).await.unwrap(), -1);
    let start = gpu.event_create().await.unwrap();
    let end = gpu.event_create().await.unwrap();

    gpu.event_record(start, stream).await.unwrap();
    gpu.event_record(end, stream).await.unwrap();
    gpu.event_synchronize(end).await.unwrap();
    assert!(gpu.event_elapsed_time(start, end).await.unwrap() >= 0.0);

    gpu.stream_destroy(stream).await.unwrap();
    gpu.event_destroy(start).await.unwrap();
    gpu.device_synchronize().await.unwrap();

    assert_eq!(gpu.stream_query(stream).await, Err(HipError::InvalidHandle));
    assert_eq!(gpu.event_query(start).await, Err(HipError::InvalidHandle));
    gpu.event_query(end).await.unwrap();
}

#[tokio::test]
async fn test_telemetry() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    assert_eq!(gpu.smi_processor_count().await, Err(SmiStatus::NotInitialized));
    gpu.smi_init(0).await.unwrap();
    assert_eq!(gpu.smi_processor_count().await.unwrap(), 2);

    let vram = gpu.smi_vram_usage(1).await.unwrap();
    assert!(vram.vram_total > 0);
    assert_eq!(gpu.smi_gpu_activity(2).await, Err(SmiStatus::NotFound));

    // telemetry failures never poison the runtime error state
    gpu.device_synchronize().await.unwrap();
    gpu.smi_shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resources_released_on_disconnect() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let gpu = worker.client();

    gpu.malloc(256).await.unwrap();
    gpu.malloc(256).await.unwrap();
    gpu.stream_create().await.unwrap();
    gpu.event_create().await.unwrap();
    gpu.module_load_data(&code_object()).await.unwrap();
    let counts = worker.runtime.resource_counts();
    assert_eq!((counts.allocations, counts.streams, counts.events, counts.modules), (2, 1, 1, 1));

    gpu.disconnect().await;
    let mut released = false;
    for _ in 0..100 {
        if worker.runtime.resource_counts() == Default::default() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "left over: {:?}", worker.runtime.resource_counts());

    // the next call reconnects
    assert_eq!(gpu.get_device_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_connections_are_isolated() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let a = worker.client();
    let b = worker.client();

    let ptr = a.malloc(32).await.unwrap();
    let mut out = [0u8; 32];
    assert_eq!(b.memcpy_dtoh(&mut out, ptr).await, Err(HipError::InvalidDevicePointer));
    a.memcpy_dtoh(&mut out, ptr).await.unwrap();
}

#[tokio::test]
async fn test_slow_synchronize_does_not_stall_other_connections() {
    let runtime = SimulatedRuntime::builder()
        .sync_latency(Duration::from_millis(800))
        .build();
    let worker = TestWorker::start(runtime).await;
    let slow = worker.client();
    let other = worker.client();
    slow.get_device_count().await.unwrap();
    other.get_device_count().await.unwrap();

    let waiting = tokio::spawn(async move { slow.device_synchronize().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let served = tokio::time::timeout(Duration::from_millis(400), other.get_device_count()).await;
    assert_eq!(served.expect("second connection stalled"), Ok(1));
    assert!(!waiting.is_finished());

    waiting.await.unwrap().unwrap();
    assert_eq!(worker.runtime.device_synchronizations(), 1);
}

#[tokio::test]
async fn test_bad_magic_closes_connection() {
    let worker = TestWorker::start(SimulatedRuntime::new(1)).await;
    let mut raw = TcpStream::connect(("127.0.0.1", worker.port)).await.unwrap();
    raw.write_all(&[0x55u8; 20]).await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), raw.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    let gpu = worker.client();
    assert_eq!(gpu.get_device_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreachable_worker_reports_not_initialized() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let gpu = RemoteGpu::new(
        ClientConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout(Duration::from_millis(500))
            .build(),
    );
    assert!(gpu.get_device_count().await.is_err());
}
