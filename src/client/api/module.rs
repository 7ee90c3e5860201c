//! Module loading, function lookup and kernel launch.
//!
//! Launch arguments are passed as a list of byte slices terminated by
//! `None`, mirroring a null-terminated parameter array:
//!
//! ```ignore
//! let n = 256u32.to_le_bytes();
//! let ptr = buffer.to_le_bytes();
//! gpu.launch_kernel(func, &LaunchConfig::new(1, 256), &[Some(&ptr), Some(&n), None]).await?;
//! ```
//!
//! When the worker reported the function's argument count, exactly that
//! many entries are marshaled. When it could not, the list is read up to
//! the first `None`.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use super::{FunctionEntry, RemoteGpu};
use crate::codec::{WireField, WireRecord};
use crate::protocol::code_object::image_extent;
use crate::protocol::payload::{FunctionInfo, GetFunctionRequest, KernelArg, LaunchRequest, ModuleLoadRequest, ModuleUnloadRequest};
use crate::protocol::{HipError, HipResult, OpCode, Reply, MAX_ARG_SIZE, MAX_KERNEL_ARGS};
use crate::transport::Connector;

/// Argument count of a resolved function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCount {
    Known(u32),
    /// Worker could not report it; count up to the terminator instead.
    Unknown,
}

impl From<Option<u32>> for ArgCount {
    fn from(arity: Option<u32>) -> Self {
        arity.map_or(ArgCount::Unknown, ArgCount::Known)
    }
}

/// Grid or block shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Launch geometry and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchConfig {
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem: u32,
    /// Target stream; 0 is the default stream.
    pub stream: u64,
}

impl LaunchConfig {
    pub fn new(grid: impl Into<Dim3>, block: impl Into<Dim3>) -> Self {
        Self {
            grid: grid.into(),
            block: block.into(),
            ..Default::default()
        }
    }

    pub fn shared_mem(mut self, bytes: u32) -> Self {
        self.shared_mem = bytes;
        self
    }

    pub fn stream(mut self, stream: u64) -> Self {
        self.stream = stream;
        self
    }
}

/// Select the argument slices to marshal.
fn collect_args<'a>(count: ArgCount, params: &[Option<&'a [u8]>]) -> HipResult<Vec<&'a [u8]>> {
    let args: Vec<&[u8]> = match count {
        ArgCount::Known(n) => {
            let n = n as usize;
            if n > params.len() {
                return Err(HipError::InvalidValue);
            }
            params[..n]
                .iter()
                .map(|p| p.ok_or(HipError::InvalidValue))
                .collect::<HipResult<_>>()?
        }
        ArgCount::Unknown => params.iter().map_while(|p| *p).collect(),
    };
    if args.len() > MAX_KERNEL_ARGS || args.iter().any(|a| a.len() > MAX_ARG_SIZE) {
        return Err(HipError::InvalidValue);
    }
    Ok(args)
}

/// Launch record plus descriptor table, and the packed argument bytes.
fn encode_launch(function: u64, config: &LaunchConfig, args: &[&[u8]]) -> (BytesMut, BytesMut) {
    let request = LaunchRequest {
        function,
        grid_x: config.grid.x,
        grid_y: config.grid.y,
        grid_z: config.grid.z,
        block_x: config.block.x,
        block_y: config.block.y,
        block_z: config.block.z,
        shared_mem: config.shared_mem,
        stream: config.stream,
        num_args: args.len() as u32,
    };
    let mut record = BytesMut::with_capacity(LaunchRequest::SIZE + args.len() * KernelArg::SIZE);
    request.put(&mut record);

    let mut data = BytesMut::new();
    for arg in args {
        KernelArg {
            size: arg.len() as u32,
            offset: data.len() as u32,
        }
        .put(&mut record);
        data.put_slice(arg);
    }
    (record, data)
}

impl<C: Connector> RemoteGpu<C> {
    /// Load a code object. The image is trimmed to the extent its own
    /// headers describe before it is sent.
    pub async fn module_load_data(&self, image: &[u8]) -> HipResult<u64> {
        self.load_module(OpCode::ModuleLoadData, image).await
    }

    /// As [`module_load_data`](Self::module_load_data); JIT options are not
    /// forwarded.
    pub async fn module_load_data_ex(&self, image: &[u8]) -> HipResult<u64> {
        self.load_module(OpCode::ModuleLoadDataEx, image).await
    }

    async fn load_module(&self, op: OpCode, image: &[u8]) -> HipResult<u64> {
        let (kind, extent) = image_extent(image).map_err(|_| HipError::InvalidImage)?;
        debug!(?kind, extent, supplied = image.len(), "loading code object");

        let req = ModuleLoadRequest {
            data_size: extent as u64,
        };
        let mut resp = [0u8; Reply::<u64>::SIZE];
        self.session
            .request_with_inline_data(op, &req.encode(), &image[..extent], &mut resp)
            .await?;
        Ok(Reply::<u64>::decode_padded(&resp).body)
    }

    /// Unload a module. Its functions leave the local cache.
    pub async fn module_unload(&self, module: u64) -> HipResult<()> {
        self.send(OpCode::ModuleUnload, &ModuleUnloadRequest { module }.encode())
            .await?;
        self.functions.retain(|_, entry| entry.module != module);
        Ok(())
    }

    /// Resolve a kernel by name and cache its argument count.
    pub async fn module_get_function(&self, module: u64, name: &str) -> HipResult<u64> {
        let req = GetFunctionRequest {
            module,
            name: name.into(),
        };
        let info: FunctionInfo = self.call(OpCode::ModuleGetFunction, &req.encode()).await?;
        let args = ArgCount::from(info.arity());
        debug!(name, function = info.function, ?args, "resolved function");
        self.functions
            .insert(info.function, FunctionEntry { module, args });
        Ok(info.function)
    }

    /// Cached argument count of a resolved function.
    pub fn function_arg_count(&self, function: u64) -> Option<ArgCount> {
        self.functions.get(&function).map(|entry| entry.args)
    }

    /// Launch a kernel (fire-and-forget).
    ///
    /// Launch-time `extra` parameters cannot be carried over the wire; a
    /// non-empty `extra` fails with `NotSupported` and nothing is sent.
    pub async fn module_launch_kernel(
        &self,
        function: u64,
        config: &LaunchConfig,
        params: &[Option<&[u8]>],
        extra: &[&[u8]],
    ) -> HipResult<()> {
        if !extra.is_empty() {
            return Err(HipError::NotSupported);
        }
        self.launch(OpCode::ModuleLaunchKernel, function, config, params)
            .await
    }

    pub async fn launch_kernel(&self, function: u64, config: &LaunchConfig, params: &[Option<&[u8]>]) -> HipResult<()> {
        self.launch(OpCode::LaunchKernel, function, config, params)
            .await
    }

    pub async fn launch_cooperative_kernel(
        &self,
        function: u64,
        config: &LaunchConfig,
        params: &[Option<&[u8]>],
    ) -> HipResult<()> {
        self.launch(OpCode::LaunchCooperativeKernel, function, config, params)
            .await
    }

    async fn launch(&self, op: OpCode, function: u64, config: &LaunchConfig, params: &[Option<&[u8]>]) -> HipResult<()> {
        let count = self
            .function_arg_count(function)
            .unwrap_or(ArgCount::Unknown);
        let args = collect_args(count, params)?;
        let (record, data) = encode_launch(function, config, &args);
        self.session
            .enqueue_no_reply_with_inline_data(op, &record, &data)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;

    #[test]
    fn test_known_count_takes_exactly_n() {
        let a = 1u64.to_le_bytes();
        let b = 2u32.to_le_bytes();
        let params = [Some(&a[..]), Some(&b[..]), None];
        let args = collect_args(ArgCount::Known(2), &params).unwrap();
        assert_eq!(args, vec![&a[..], &b[..]]);

        // zero is a real count, not a fallback
        assert!(collect_args(ArgCount::Known(0), &params).unwrap().is_empty());
    }

    #[test]
    fn test_known_count_rejects_short_list() {
        let a = [0u8; 8];
        assert_eq!(
            collect_args(ArgCount::Known(2), &[Some(&a[..]), None]),
            Err(HipError::InvalidValue)
        );
        assert_eq!(collect_args(ArgCount::Known(3), &[Some(&a[..])]), Err(HipError::InvalidValue));
    }

    #[test]
    fn test_unknown_count_stops_at_terminator() {
        let a = [1u8; 4];
        let params = [Some(&a[..]), Some(&a[..]), None, Some(&a[..])];
        assert_eq!(collect_args(ArgCount::Unknown, &params).unwrap().len(), 2);
        assert_eq!(collect_args(ArgCount::Unknown, &[Some(&a[..])]).unwrap().len(), 1);
        assert!(collect_args(ArgCount::Unknown, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_argument_limits() {
        let big = [0u8; MAX_ARG_SIZE + 1];
        assert_eq!(collect_args(ArgCount::Unknown, &[Some(&big[..])]), Err(HipError::InvalidValue));

        let small = [0u8; 8];
        let many = vec![Some(&small[..]); MAX_KERNEL_ARGS + 1];
        assert_eq!(collect_args(ArgCount::Unknown, &many), Err(HipError::InvalidValue));
        assert!(collect_args(ArgCount::Unknown, &many[..MAX_KERNEL_ARGS]).is_ok());
    }

    #[test]
    fn test_encode_launch_layout() {
        let config = LaunchConfig::new(4, (64, 2, 1)).shared_mem(128).stream(0x53);
        let a = [0xAAu8; 8];
        let b = [0xBBu8; 4];
        let (record, data) = encode_launch(0x46, &config, &[&a[..], &b[..]]);

        assert_eq!(record.len(), LaunchRequest::SIZE + 2 * KernelArg::SIZE);
        let request = LaunchRequest::decode(&record).unwrap();
        assert_eq!(request.grid(), [4, 1, 1]);
        assert_eq!(request.block(), [64, 2, 1]);
        assert_eq!(request.shared_mem, 128);
        assert_eq!(request.stream, 0x53);
        assert_eq!(request.num_args, 2);

        let second = KernelArg::decode(&record[LaunchRequest::SIZE + KernelArg::SIZE..]).unwrap();
        assert_eq!(second, KernelArg { size: 4, offset: 8 });
        assert_eq!(&data[..8], &a);
        assert_eq!(&data[8..], &b);
    }

    #[tokio::test]
    async fn test_extra_params_rejected_before_sending() {
        let gpu = RemoteGpu::new(ClientConfig::builder().host("127.0.0.1").port(1).build());
        let extra: [&[u8]; 1] = [b"config"];
        assert_eq!(
            gpu.module_launch_kernel(0x46, &LaunchConfig::default(), &[None], &extra)
                .await,
            Err(HipError::NotSupported)
        );
        assert!(!gpu.session().is_connected().await);
    }

    #[tokio::test]
    async fn test_invalid_image_rejected_locally() {
        let gpu = RemoteGpu::new(ClientConfig::builder().host("127.0.0.1").port(1).build());
        assert_eq!(gpu.module_load_data(b"not a code object").await, Err(HipError::InvalidImage));
    }
}
