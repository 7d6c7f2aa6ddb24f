use std::any::TypeId;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::slice;

use crate::address::Address;
use crate::allocator::CachingAllocator;

/// In-block message header. The header and the payload share a single block
/// from the caching allocator; the payload starts at `payload_offset` bytes
/// from the block base.
pub(crate) struct Header {
    type_id: TypeId,
    from: Address,
    block_size: u32,
    payload_offset: u32,
    payload_size: u32,
    payload_align: u32,
    drop_payload: unsafe fn(*mut u8),
}

/// An owned, type-erased message envelope occupying one cached block.
///
/// A message is created by the sending framework's allocator and released
/// against the allocator of the framework that consumes it; for
/// cross-framework traffic the consumer's pools grow while the sender's
/// shrink, and that asymmetry is intended.
pub(crate) struct Message {
    header: NonNull<Header>,
}

// The payload type is constrained to Send at pack time.
unsafe impl Send for Message {}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl Message {
    /// Packages `value` into a freshly allocated block, recording its type
    /// identity and the sender. Returns `None` when the allocator fails.
    pub(crate) fn pack<M: Send + 'static>(
        allocator: &CachingAllocator,
        value: M,
        from: Address,
    ) -> Option<Self> {
        let payload_size = mem::size_of::<M>() as u32;
        let payload_align = mem::align_of::<M>() as u32;
        let header_span = mem::size_of::<Header>() as u32;

        // Worst-case span: header, padding up to the payload alignment,
        // payload. Blocks are cache-line aligned, so small alignments cost
        // nothing extra.
        let slack = payload_align.saturating_sub(1);
        let block_size = CachingAllocator::effective_size(header_span + slack + payload_size);

        let block = allocator.allocate(block_size)?;
        let base = block.as_ptr() as usize;
        let payload_addr = align_up(base + header_span as usize, payload_align as usize);
        let payload_offset = (payload_addr - base) as u32;

        unsafe fn drop_in<M>(payload: *mut u8) {
            unsafe { ptr::drop_in_place(payload.cast::<M>()) }
        }

        unsafe {
            block.cast::<Header>().as_ptr().write(Header {
                type_id: TypeId::of::<M>(),
                from,
                block_size,
                payload_offset,
                payload_size,
                payload_align,
                drop_payload: drop_in::<M>,
            });
            (payload_addr as *mut M).write(value);
        }

        Some(Self {
            header: block.cast(),
        })
    }

    /// Raw pointer to the in-block header, used to peek at the head of a
    /// mailbox without removing it.
    pub(crate) fn raw(&self) -> NonNull<Header> {
        self.header
    }

    pub(crate) fn view(&self) -> MessageView<'_> {
        MessageView {
            header: unsafe { self.header.as_ref() },
        }
    }

    /// Destroys the payload and returns the block to `allocator`.
    pub(crate) fn release(self, allocator: &CachingAllocator) {
        let this = ManuallyDrop::new(self);
        unsafe {
            let block_size = this.destroy_contents();
            allocator.free(this.header.cast(), block_size);
        }
    }

    /// Drops the payload and header in place; returns the block size.
    unsafe fn destroy_contents(&self) -> u32 {
        let header = self.header.as_ptr();
        unsafe {
            let block_size = (*header).block_size;
            let payload = header.cast::<u8>().add((*header).payload_offset as usize);
            ((*header).drop_payload)(payload);
            ptr::drop_in_place(header);
            block_size
        }
    }
}

impl Drop for Message {
    /// Safety net for messages that never reach a worker, e.g. a mailbox
    /// drained at teardown: the payload is destroyed and the block goes
    /// straight back to the global allocator.
    fn drop(&mut self) {
        unsafe {
            let block_size = self.destroy_contents();
            CachingAllocator::dealloc_block(self.header.cast(), block_size);
        }
    }
}

/// Borrowed view of a message, used during dispatch and by fallback handlers.
#[derive(Clone, Copy)]
pub(crate) struct MessageView<'a> {
    header: &'a Header,
}

impl<'a> MessageView<'a> {
    /// # Safety
    ///
    /// `header` must point into a live message block, and the message must
    /// not be popped or released while the view is in use. The dispatch path
    /// upholds this: the head message stays queued until after dispatch, and
    /// only the dispatching worker may pop it.
    pub(crate) unsafe fn from_raw(header: NonNull<Header>) -> Self {
        Self {
            header: unsafe { &*header.as_ptr() },
        }
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    pub(crate) fn sender(&self) -> &'a Address {
        &self.header.from
    }

    pub(crate) fn size(&self) -> u32 {
        self.header.payload_size
    }

    pub(crate) fn alignment(&self) -> u32 {
        self.header.payload_align
    }

    fn payload_ptr(&self) -> *const u8 {
        let base: *const Header = self.header;
        unsafe { base.cast::<u8>().add(self.header.payload_offset as usize) }
    }

    /// Typed payload access; `None` when the type does not match.
    pub(crate) fn payload<M: 'static>(&self) -> Option<&'a M> {
        (self.header.type_id == TypeId::of::<M>())
            .then(|| unsafe { &*self.payload_ptr().cast::<M>() })
    }

    /// Raw payload bytes, for blind fallback handlers.
    pub(crate) fn bytes(&self) -> &'a [u8] {
        unsafe { slice::from_raw_parts(self.payload_ptr(), self.header.payload_size as usize) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn view_exposes_type_payload_and_sender() {
        let allocator = CachingAllocator::new();
        let from = Address::new(1, 7);
        let message = Message::pack(&allocator, 42i64, from.clone()).unwrap();

        let view = message.view();
        assert_eq!(view.type_id(), TypeId::of::<i64>());
        assert_eq!(view.payload::<i64>(), Some(&42));
        assert_eq!(view.payload::<u8>(), None);
        assert_eq!(view.sender(), &from);
        assert_eq!(view.size(), 8);
        assert_eq!(view.alignment(), mem::align_of::<i64>() as u32);

        message.release(&allocator);
    }

    #[test]
    fn release_drops_the_payload_exactly_once() {
        let allocator = CachingAllocator::new();
        let probe = Arc::new(());

        let message = Message::pack(&allocator, Arc::clone(&probe), Address::null()).unwrap();
        assert_eq!(Arc::strong_count(&probe), 2);

        message.release(&allocator);
        assert_eq!(Arc::strong_count(&probe), 1);
    }

    #[test]
    fn dropping_an_unreleased_message_frees_the_payload() {
        let allocator = CachingAllocator::new();
        let probe = Arc::new(());

        let message = Message::pack(&allocator, Arc::clone(&probe), Address::null()).unwrap();
        drop(message);
        assert_eq!(Arc::strong_count(&probe), 1);
    }

    #[test]
    fn payload_is_aligned_inside_the_block() {
        #[repr(align(32))]
        #[derive(Debug, PartialEq)]
        struct Wide([u8; 32]);

        let allocator = CachingAllocator::new();
        let message = Message::pack(&allocator, Wide([7; 32]), Address::null()).unwrap();

        let view = message.view();
        let payload = view.payload::<Wide>().unwrap();
        assert_eq!(payload as *const Wide as usize % 32, 0);
        assert_eq!(payload, &Wide([7; 32]));

        message.release(&allocator);
    }

    #[test]
    fn released_blocks_are_reused_for_equal_sizes() {
        let allocator = CachingAllocator::new();

        let first = Message::pack(&allocator, 1u32, Address::null()).unwrap();
        let first_block = first.raw();
        first.release(&allocator);

        let second = Message::pack(&allocator, 2u32, Address::null()).unwrap();
        assert_eq!(second.raw(), first_block);
        second.release(&allocator);
    }

    #[test]
    fn zero_sized_payloads_are_supported() {
        struct Ping;

        let allocator = CachingAllocator::new();
        let message = Message::pack(&allocator, Ping, Address::null()).unwrap();

        let view = message.view();
        assert_eq!(view.size(), 0);
        assert!(view.payload::<Ping>().is_some());
        assert!(view.bytes().is_empty());

        message.release(&allocator);
    }
}
