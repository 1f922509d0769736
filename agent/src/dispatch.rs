//! Marshal one generic remote call.
//!
//! The request is decoded strictly in wire order (header, input payload, buffer table,
//! handles), executed against [Platform::dispatch] and answered with the status word followed,
//! only on success, by the output payload, the output objects and the post-call contents of
//! every inline `out` buffer in table order.
//!
//! The input payload, the output payload and every inline buffer live in [Scratch] memory
//! borrowed from the agent's [Heap] and are released on every exit path. Reference buffers are
//! used in place and never allocated or freed. If any scratch allocation fails, the rest of the
//! request is consumed and the reply is OutOfMemory alone.

use crate::{
    heap::Heap,
    memory::{RawRegion, Scratch},
    platform::{Buffer, Call, Platform},
    Error,
};
use ipcbridge_protocol::{
    Address, BufferAttr, BufferDescriptor, DispatchHeader, Handle, ServiceHandle, Status,
    TransportMode,
};
use ipcbridge_stream::Channel;
use std::io;
use tracing::{debug, warn};

/// A decoded buffer table entry and the scratch backing it (if inline).
struct Entry<'a, H: Heap> {
    attr: BufferAttr,
    region: RawRegion,
    scratch: Option<Scratch<'a, H>>,
}

/// Consume the remainder of a request that will not be executed.
fn drain<T: io::Read + io::Write>(
    channel: &mut Channel<T>,
    header: &DispatchHeader,
) -> Result<(), Error> {
    for _ in 0..header.num_buffers {
        let descriptor: BufferDescriptor = channel.recv()?;
        channel.discard(descriptor.trailing_request_len())?;
    }
    for _ in 0..header.in_num_handles {
        let _: Handle = channel.recv()?;
    }
    Ok(())
}

/// Serve a DispatchToService request.
pub fn dispatch<T, H, P>(channel: &mut Channel<T>, heap: &H, platform: &mut P) -> Result<(), Error>
where
    T: io::Read + io::Write,
    H: Heap,
    P: Platform,
{
    let header: DispatchHeader = channel.recv()?;
    if let Err(err) = header.validate() {
        warn!(?err, request_id = header.request_id, "rejecting dispatch");
        channel.discard(header.in_size as u64)?;
        drain(channel, &header)?;
        channel.send_value(&Status::LIMIT_EXCEEDED)?;
        return Ok(());
    }

    // Once a request is rejected the rest of its body is consumed without allocating
    let mut rejection = None;
    let input = match Scratch::new(heap, header.in_size as usize) {
        Some(mut input) => {
            channel.recv_into(input.as_mut_slice())?;
            Some(input)
        }
        None => {
            warn!(in_size = header.in_size, "unable to allocate input payload");
            channel.discard(header.in_size as u64)?;
            rejection = Some(Status::OUT_OF_MEMORY);
            None
        }
    };
    let mut output = None;
    if rejection.is_none() {
        output = Scratch::new(heap, header.out_size as usize);
        if output.is_none() {
            warn!(out_size = header.out_size, "unable to allocate output payload");
            rejection = Some(Status::OUT_OF_MEMORY);
        }
    }
    let mut entries: Vec<Entry<'_, H>> = Vec::with_capacity(header.num_buffers as usize);
    for index in 0..header.num_buffers {
        let descriptor: BufferDescriptor = channel.recv()?;
        let len = usize::try_from(descriptor.size).ok();
        match descriptor.mode {
            TransportMode::Reference => {
                let address: Address = channel.recv()?;
                let Some(len) = len else {
                    if rejection.is_none() {
                        rejection = Some(Status::INVALID_ARGUMENT);
                    }
                    continue;
                };
                entries.push(Entry {
                    attr: descriptor.attr,
                    region: RawRegion::new(address, len),
                    scratch: None,
                });
            }
            TransportMode::Inline => {
                let scratch = match (rejection, len) {
                    (None, Some(len)) => Scratch::new(heap, len),
                    _ => None,
                };
                let Some(mut scratch) = scratch else {
                    if rejection.is_none() {
                        warn!(index, size = descriptor.size, "unable to allocate inline buffer");
                        rejection = Some(Status::OUT_OF_MEMORY);
                    }
                    channel.discard(descriptor.trailing_request_len())?;
                    continue;
                };
                if descriptor.attr.is_in() {
                    channel.recv_into(scratch.as_mut_slice())?;
                }
                entries.push(Entry {
                    attr: descriptor.attr,
                    region: scratch.region(),
                    scratch: Some(scratch),
                });
            }
        }
    }
    let handles = (0..header.in_num_handles)
        .map(|_| channel.recv::<Handle>())
        .collect::<Result<Vec<_>, _>>()?;
    let (input, mut output) = match (rejection, input, output) {
        (None, Some(input), Some(output)) => (input, output),
        (status, _, _) => {
            channel.send_value(&status.unwrap_or(Status::OUT_OF_MEMORY))?;
            return Ok(());
        }
    };

    let buffers: Vec<Buffer> = entries
        .iter()
        .map(|entry| Buffer {
            region: entry.region,
            attr: entry.attr,
        })
        .collect();
    let mut objects: Vec<ServiceHandle> = (0..header.out_num_objects)
        .map(|_| ServiceHandle::default())
        .collect();
    let result = platform.dispatch(
        &header.service,
        Call {
            request_id: header.request_id,
            input: input.as_slice(),
            output: output.as_mut_slice(),
            buffers: &buffers,
            handles: &handles,
            send_pid: header.send_pid,
            in_object_count: header.in_num_objects,
            objects: &mut objects,
            out_handle_count: header.out_num_handles,
            target_session: header.target_session,
            context: header.context,
        },
    );
    if let Err(status) = result {
        debug!(request_id = header.request_id, %status, "dispatch failed");
        channel.send_value(&status)?;
        return Ok(());
    }

    debug!(
        request_id = header.request_id,
        out_size = header.out_size,
        objects = objects.len(),
        "dispatch succeeded"
    );
    channel.send_value(&Status::SUCCESS)?;
    channel.send(output.as_slice())?;
    for object in &objects {
        channel.send_value(object)?;
    }
    for entry in &entries {
        if let (Some(scratch), true) = (&entry.scratch, entry.attr.is_out()) {
            channel.send(scratch.as_slice())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        heap::{Counting, Native},
        simulated,
    };
    use ipcbridge_codec::{DecodeExt, Encode, FixedSize};
    use ipcbridge_macros::test_traced;
    use ipcbridge_protocol::{Allocation, ServiceName};
    use ipcbridge_stream::{mocks::Scripted, Config};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::ptr::NonNull;

    /// Refuses every allocation larger than `limit` bytes.
    struct Bounded<'a> {
        inner: &'a Counting<Native>,
        limit: u64,
    }

    impl Heap for Bounded<'_> {
        fn allocate(&self, request: Allocation) -> Option<NonNull<u8>> {
            if request.size() > self.limit {
                return None;
            }
            self.inner.allocate(request)
        }

        unsafe fn free(&self, ptr: *mut u8) {
            self.inner.free(ptr)
        }
    }

    enum Wire<'a> {
        Inline(BufferAttr, u64, &'a [u8]),
        Reference(BufferAttr, u64, Address),
    }

    fn copy(handle: &ServiceHandle) -> ServiceHandle {
        ServiceHandle::from_raw_parts(
            handle.session,
            handle.own_handle,
            handle.object_id,
            handle.pointer_buffer_size,
        )
    }

    fn header(service: &ServiceHandle, request_id: u32, input: &[u8]) -> DispatchHeader {
        DispatchHeader {
            service: copy(service),
            request_id,
            in_size: input.len() as u32,
            ..Default::default()
        }
    }

    fn encode(
        header: &DispatchHeader,
        input: &[u8],
        buffers: &[Wire<'_>],
        handles: &[Handle],
    ) -> Vec<u8> {
        let mut out = header.encode().to_vec();
        out.extend_from_slice(input);
        for buffer in buffers {
            match buffer {
                Wire::Inline(attr, size, data) => {
                    let descriptor = BufferDescriptor {
                        size: *size,
                        attr: *attr,
                        mode: TransportMode::Inline,
                    };
                    out.extend_from_slice(&descriptor.encode());
                    out.extend_from_slice(data);
                }
                Wire::Reference(attr, size, address) => {
                    let descriptor = BufferDescriptor {
                        size: *size,
                        attr: *attr,
                        mode: TransportMode::Reference,
                    };
                    out.extend_from_slice(&descriptor.encode());
                    out.extend_from_slice(&address.to_le_bytes());
                }
            }
        }
        for handle in handles {
            out.extend_from_slice(&handle.to_le_bytes());
        }
        out
    }

    fn setup() -> (simulated::Platform, ServiceHandle) {
        let mut platform = simulated::Platform::with_services(["fsp-srv"]).unwrap();
        let service = platform
            .open(&ServiceName::new("fsp-srv").unwrap())
            .unwrap();
        (platform, service)
    }

    fn run(input: Vec<u8>, heap: &impl Heap, platform: &mut simulated::Platform) -> Scripted {
        let mut channel = Channel::new(Scripted::new(input), Config::default());
        dispatch(&mut channel, heap, platform).unwrap();
        channel.into_inner()
    }

    fn status(output: &[u8]) -> Status {
        Status::decode(&output[..Status::SIZE]).unwrap()
    }

    #[test_traced]
    fn test_echo_payload() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);
        let mut header = header(&service, simulated::ECHO, b"ping");
        header.out_size = 4;

        let scripted = run(encode(&header, b"ping", &[], &[]), &heap, &mut platform);
        assert_eq!(scripted.remaining(), 0);
        let output = scripted.output();
        assert_eq!(status(output), Status::SUCCESS);
        assert_eq!(&output[4..], b"ping");

        // Input and output payloads are scratch too
        assert_eq!(heap.stats().allocations(), 2);
        assert_eq!(heap.stats().outstanding(), 0);
    }

    #[test_traced]
    fn test_reply_length_and_order() {
        let (mut platform, service) = setup();
        platform.convert_to_domain(&mut copy(&service)).unwrap();
        let service = ServiceHandle::from_raw_parts(service.session, 1, 1, 0);
        let heap = Counting::new(Native);

        let mut rng = StdRng::seed_from_u64(0);
        let mut data = [0u8; 24];
        rng.fill(&mut data[..]);
        let mut header = header(&service, simulated::OPEN_OBJECTS, &[]);
        header.out_size = 8;
        header.out_num_objects = 2;
        header.num_buffers = 4;
        let buffers = [
            Wire::Inline(BufferAttr::IN, 24, &data),
            Wire::Inline(BufferAttr::OUT, 16, &[]),
            Wire::Inline(BufferAttr::IN | BufferAttr::OUT, 3, b"xyz"),
            Wire::Inline(BufferAttr::OUT | BufferAttr::HIPC_POINTER, 5, &[]),
        ];

        let scripted = run(encode(&header, &[], &buffers, &[]), &heap, &mut platform);
        assert_eq!(scripted.remaining(), 0);
        let output = scripted.output();
        assert_eq!(status(output), Status::SUCCESS);
        assert_eq!(
            output.len(),
            Status::SIZE + 8 + 2 * ServiceHandle::SIZE + 16 + 3 + 5
        );

        let objects = &output[Status::SIZE + 8..Status::SIZE + 8 + 2 * ServiceHandle::SIZE];
        let first = ServiceHandle::decode(&objects[..ServiceHandle::SIZE]).unwrap();
        assert!(first.is_domain_subservice());
        assert!(platform.is_open(&first));

        // Only out buffers follow, in table order; in-out data is relayed back untouched
        let tail = &output[Status::SIZE + 8 + 2 * ServiceHandle::SIZE..];
        assert!(tail[..16].iter().all(|b| *b == 0));
        assert_eq!(&tail[16..19], b"xyz");

        let stats = heap.stats();
        assert_eq!(stats.allocations(), 5);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test_traced]
    fn test_gather_across_modes() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);

        let mut target = [0u8; 6];
        let target_address = target.as_mut_ptr() as usize as Address;
        let source = *b"ABCD";
        let source_address = source.as_ptr() as usize as Address;

        let mut header = header(&service, simulated::GATHER, &[]);
        header.num_buffers = 3;
        let buffers = [
            Wire::Reference(BufferAttr::IN, 4, source_address),
            Wire::Inline(BufferAttr::IN, 2, b"ef"),
            Wire::Reference(BufferAttr::OUT, 6, target_address),
        ];
        let scripted = run(encode(&header, &[], &buffers, &[]), &heap, &mut platform);

        // Reference out buffers are written in place and never streamed back
        assert_eq!(scripted.output(), &Status::SUCCESS.encode()[..]);
        assert_eq!(&target, b"ABCDef");
        assert_eq!(heap.stats().allocations(), 1);
        assert_eq!(heap.stats().outstanding(), 0);
    }

    #[test_traced]
    fn test_reference_buffers_never_allocate() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);

        let mut region = [7u8; 32];
        let address = region.as_mut_ptr() as usize as Address;
        let mut header = header(&service, simulated::GATHER, &[]);
        header.num_buffers = 2;
        let buffers = [
            Wire::Reference(BufferAttr::IN, 16, address),
            Wire::Reference(BufferAttr::OUT, 16, address + 16),
        ];
        let scripted = run(encode(&header, &[], &buffers, &[]), &heap, &mut platform);
        assert_eq!(status(scripted.output()), Status::SUCCESS);
        assert_eq!(heap.stats().allocations(), 0);
        assert_eq!(heap.stats().frees(), 0);
        assert_eq!(region, [7u8; 32]);
    }

    #[test_traced("TRACE")]
    fn test_out_only_inline_not_read() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);

        let mut header = header(&service, simulated::ECHO_HANDLES, &[]);
        header.num_buffers = 1;
        header.in_num_handles = 2;
        header.out_size = 9;
        let buffers = [Wire::Inline(BufferAttr::OUT, 0x1000, &[])];

        // The script ends right after the handles: reading buffer data would fail
        let scripted = run(
            encode(&header, &[], &buffers, &[5, 6]),
            &heap,
            &mut platform,
        );
        assert_eq!(scripted.remaining(), 0);
        let output = scripted.output();
        assert_eq!(status(output), Status::SUCCESS);
        assert_eq!(&output[4..13], &[5, 0, 0, 0, 6, 0, 0, 0, 0]);
        assert_eq!(output.len(), Status::SIZE + 9 + 0x1000);
    }

    #[test_traced]
    fn test_failure_sends_status_only() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);

        let failure = Status::new(2, 1002);
        let input = failure.raw().to_le_bytes();
        let mut header = header(&service, simulated::FAIL, &input);
        header.out_size = 32;
        header.out_num_objects = 1;
        header.num_buffers = 2;
        let buffers = [
            Wire::Inline(BufferAttr::IN, 4, b"data"),
            Wire::Inline(BufferAttr::OUT, 64, &[]),
        ];
        let scripted = run(encode(&header, &input, &buffers, &[]), &heap, &mut platform);
        assert_eq!(scripted.remaining(), 0);
        assert_eq!(scripted.output(), &failure.encode()[..]);

        let stats = heap.stats();
        assert_eq!(stats.allocations(), 4);
        assert_eq!(stats.frees(), 4);
    }

    #[test_traced]
    fn test_limit_exceeded_consumes_body() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);

        let mut header = header(&service, simulated::ECHO, b"in");
        header.num_buffers = 9;
        header.in_num_handles = 1;
        let buffers: Vec<Wire<'_>> = (0..9)
            .map(|i| match i % 3 {
                0 => Wire::Inline(BufferAttr::IN, 3, b"abc"),
                1 => Wire::Inline(BufferAttr::OUT, 100, &[]),
                _ => Wire::Reference(BufferAttr::IN, 8, 0x1000),
            })
            .collect();
        let mut input = encode(&header, b"in", &buffers, &[1]);
        input.push(0xff);

        let mut channel = Channel::new(Scripted::new(input), Config::default());
        dispatch(&mut channel, &heap, &mut platform).unwrap();
        let scripted = channel.into_inner();

        // Exactly the trailing sentinel is left for the next command
        assert_eq!(scripted.remaining(), 1);
        assert_eq!(scripted.output(), &Status::LIMIT_EXCEEDED.encode()[..]);
        assert_eq!(heap.stats().allocations(), 0);
    }

    #[test_traced]
    fn test_out_of_memory_drains_and_frees() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);

        let mut header = header(&service, simulated::ECHO, &[]);
        header.num_buffers = 3;
        header.in_num_handles = 1;
        let buffers = [
            Wire::Inline(BufferAttr::IN, 4, b"keep"),
            Wire::Inline(BufferAttr::OUT, u64::MAX, &[]),
            Wire::Inline(BufferAttr::IN, 3, b"end"),
        ];
        let scripted = run(encode(&header, &[], &buffers, &[9]), &heap, &mut platform);
        assert_eq!(scripted.remaining(), 0);
        assert_eq!(scripted.output(), &Status::OUT_OF_MEMORY.encode()[..]);

        let stats = heap.stats();
        assert_eq!(stats.allocations(), 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test_traced]
    fn test_output_payload_out_of_memory() {
        let (mut platform, service) = setup();
        let counting = Counting::new(Native);
        let heap = Bounded {
            inner: &counting,
            limit: 0x1000,
        };

        let mut header = header(&service, simulated::ECHO, b"ping");
        header.out_size = u32::MAX;
        header.num_buffers = 2;
        header.in_num_handles = 1;
        let buffers = [
            Wire::Inline(BufferAttr::IN, 3, b"abc"),
            Wire::Inline(BufferAttr::OUT, 8, &[]),
        ];
        let mut input = encode(&header, b"ping", &buffers, &[1]);
        input.push(0xff);

        let scripted = run(input, &heap, &mut platform);
        assert_eq!(scripted.remaining(), 1);
        assert_eq!(scripted.output(), &Status::OUT_OF_MEMORY.encode()[..]);

        // Only the input payload was taken before the failure, and it was given back
        let stats = counting.stats();
        assert_eq!(stats.allocations(), 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test_traced]
    fn test_input_payload_out_of_memory() {
        let (mut platform, service) = setup();
        let counting = Counting::new(Native);
        let heap = Bounded {
            inner: &counting,
            limit: 32,
        };

        let payload = [0x5a; 64];
        let mut header = header(&service, simulated::ECHO, &payload);
        header.out_size = 4;
        header.num_buffers = 1;
        let buffers = [Wire::Inline(BufferAttr::IN, 4, b"keep")];
        let mut input = encode(&header, &payload, &buffers, &[]);
        input.push(0xff);

        let scripted = run(input, &heap, &mut platform);
        assert_eq!(scripted.remaining(), 1);
        assert_eq!(scripted.output(), &Status::OUT_OF_MEMORY.encode()[..]);
        assert_eq!(counting.stats().allocations(), 0);
    }

    #[test_traced]
    fn test_closed_service_rejected() {
        let (mut platform, service) = setup();
        let heap = Counting::new(Native);
        let header = header(&service, simulated::ECHO, &[]);
        platform.close(service);

        let scripted = run(encode(&header, &[], &[], &[]), &heap, &mut platform);
        assert_eq!(scripted.output(), &simulated::INVALID_HANDLE.encode()[..]);
    }
}
