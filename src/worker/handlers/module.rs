//! Code objects, functions and kernel launches.

use tracing::debug;

use crate::protocol::code_object::image_extent;
use crate::protocol::payload::{FunctionInfo, GetFunctionRequest, ModuleUnloadRequest};
use crate::protocol::{HipError, KernelLaunch};
use crate::worker::context::Response;
use crate::worker::dispatcher::{Connection, FunctionEntry};
use crate::worker::runtime::{GpuRuntime, LaunchParams};
use crate::worker::telemetry::SmiLibrary;

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    /// Load a code object. The image's own extent is checked against the
    /// bytes received before the runtime sees it.
    pub(crate) fn module_load(&mut self, image: &[u8]) -> Response {
        let extent = match image_extent(image) {
            Ok((kind, extent)) => {
                debug!(?kind, extent, received = image.len(), "loading code object");
                extent
            }
            Err(err) => {
                debug!("rejected code object: {}", err);
                return Response::failed::<u64>(HipError::InvalidImage);
            }
        };
        let result = self
            .runtime
            .module_load(&image[..extent])
            .map(|native| self.modules.insert(native));
        Response::from_result(result)
    }

    /// Unload a module and forget every function resolved from it.
    pub(crate) fn module_unload(&mut self, req: ModuleUnloadRequest) -> Response {
        let result = self
            .modules
            .get(req.module)
            .copied()
            .and_then(|native| self.runtime.module_unload(native))
            .and_then(|()| self.modules.remove(req.module).map(drop));
        if result.is_ok() {
            self.functions.retain(|f| f.module != req.module);
        }
        Response::status(result)
    }

    pub(crate) fn module_get_function(&mut self, req: GetFunctionRequest) -> Response {
        let module = req.module;
        let result = self
            .modules
            .get(module)
            .copied()
            .and_then(|native| self.runtime.module_get_function(native, req.name.as_str()))
            .map(|resolved| {
                let handle = self.functions.insert(FunctionEntry {
                    native: resolved.handle,
                    module,
                    arity: resolved.arity,
                });
                FunctionInfo::new(handle, resolved.arity)
            });
        Response::from_result(result)
    }

    pub(crate) fn launch_kernel(&mut self, launch: KernelLaunch) -> Response {
        let KernelLaunch {
            request,
            args,
            cooperative,
        } = launch;
        let result = self
            .functions
            .get(request.function)
            .copied()
            .map_err(|_| HipError::InvalidDeviceFunction)
            .and_then(|function| {
                if function.arity.is_some_and(|n| n as usize != args.len()) {
                    return Err(HipError::InvalidValue);
                }
                let params = LaunchParams {
                    grid: request.grid(),
                    block: request.block(),
                    shared_mem: request.shared_mem,
                    stream: self.native_stream(request.stream)?,
                    cooperative,
                };
                let args: Vec<&[u8]> = args.iter().map(|arg| &arg[..]).collect();
                self.runtime.launch_kernel(function.native, &params, &args)
            });
        Response::status(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body, call, connection, TestConnection};
    use super::*;
    use crate::codec::{WireField, WireRecord};
    use crate::protocol::code_object::tests::elf_image;
    use crate::protocol::payload::{KernelArg, LaunchRequest, MallocRequest, ModuleLoadRequest};
    use crate::protocol::{flags, OpCode};
    use crate::worker::runtime::SimulatedRuntime;
    use bytes::BytesMut;

    fn load(conn: &mut TestConnection) -> u64 {
        let image = elf_image(4, 16);
        let mut payload = ModuleLoadRequest {
            data_size: image.len() as u64,
        }
        .encode()
        .to_vec();
        payload.extend_from_slice(&image);
        let response = call(conn, OpCode::ModuleLoadData, flags::HAS_INLINE_DATA, &payload);
        assert!(response.is_success());
        crate::protocol::Reply::<u64>::decode(&response.record).unwrap().body
    }

    fn function(conn: &mut TestConnection, module: u64, name: &str) -> FunctionInfo {
        let req = GetFunctionRequest {
            module,
            name: name.into(),
        };
        body(conn, OpCode::ModuleGetFunction, &req.encode())
    }

    fn launch(function: u64, args: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        LaunchRequest {
            function,
            grid_x: 1,
            grid_y: 1,
            grid_z: 1,
            block_x: 4,
            block_y: 1,
            block_z: 1,
            num_args: args.len() as u32,
            ..Default::default()
        }
        .put(&mut buf);
        let mut offset = 0;
        for arg in args {
            KernelArg {
                size: arg.len() as u32,
                offset,
            }
            .put(&mut buf);
            offset += arg.len() as u32;
        }
        for arg in args {
            buf.extend_from_slice(arg);
        }
        buf.to_vec()
    }

    #[test]
    fn test_load_resolve_launch() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let module = load(&mut conn);
        assert_eq!(module >> 56, u64::from(b'M'));

        let fill = function(&mut conn, module, "fill_u32");
        assert_eq!(fill.arity(), Some(3));
        assert_eq!(fill.function >> 56, u64::from(b'F'));

        let ptr: u64 = body(&mut conn, OpCode::Malloc, &MallocRequest { size: 16, flags: 0 }.encode());
        let (p, v, n) = (ptr.to_le_bytes(), 9u32.to_le_bytes(), 4u32.to_le_bytes());
        let response = call(&mut conn, OpCode::ModuleLaunchKernel, 0, &launch(fill.function, &[&p[..], &v[..], &n[..]]));
        assert!(response.is_success());

        let launches = conn.runtime.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].kernel, "fill_u32");
        assert_eq!(launches[0].args[1], 9u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_unknown_arity_reported_as_unknown() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let module = load(&mut conn);
        assert_eq!(function(&mut conn, module, "record_args").arity(), None);
        assert_eq!(function(&mut conn, module, "noop").arity(), Some(0));
    }

    #[test]
    fn test_invalid_image_and_names() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let mut payload = ModuleLoadRequest { data_size: 8 }.encode().to_vec();
        payload.extend_from_slice(b"notanelf");
        let response = call(&mut conn, OpCode::ModuleLoadData, flags::HAS_INLINE_DATA, &payload);
        assert_eq!(response.code, HipError::InvalidImage.code());
        assert_eq!(response.record.len(), crate::protocol::Reply::<u64>::SIZE);

        let module = load(&mut conn);
        let req = GetFunctionRequest {
            module,
            name: "missing".into(),
        };
        let response = call(&mut conn, OpCode::ModuleGetFunction, 0, &req.encode());
        assert_eq!(response.code, HipError::NotFound.code());
    }

    #[test]
    fn test_unload_invalidates_functions() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let module = load(&mut conn);
        let noop = function(&mut conn, module, "noop").function;

        let unload = ModuleUnloadRequest { module }.encode();
        assert!(call(&mut conn, OpCode::ModuleUnload, 0, &unload).is_success());
        assert!(conn.functions.is_empty());

        let response = call(&mut conn, OpCode::LaunchKernel, 0, &launch(noop, &[]));
        assert_eq!(response.code, HipError::InvalidDeviceFunction.code());
        let again = call(&mut conn, OpCode::ModuleUnload, 0, &unload);
        assert_eq!(again.code, HipError::InvalidHandle.code());
    }

    #[test]
    fn test_argument_count_must_match_known_arity() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let module = load(&mut conn);
        let noop = function(&mut conn, module, "noop").function;
        let response = call(&mut conn, OpCode::LaunchKernel, 0, &launch(noop, &[&[1u8, 2, 3, 4][..]]));
        assert_eq!(response.code, HipError::InvalidValue.code());
        assert!(conn.runtime.launches().is_empty());
    }
}
