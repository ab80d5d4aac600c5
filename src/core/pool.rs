//! # Packet Pool
//!
//! Slab allocator for [`Packet`]s under high churn.
//!
//! Slots are allocated 256 at a time and linked into a single index-based
//! free list. Growing the pool appends another slab; existing slabs are never
//! resized, so a live [`PacketId`] names the same slot for its whole lifetime.
//! Released packets keep their buffer capacity for the next user.
//!
//! ## Holder counting
//! [`PacketPool::acquire`] hands out a packet with one holder. Every extra
//! handoff (one per destination of a broadcast) calls [`PacketPool::retain`]
//! first; every holder calls [`PacketPool::release`] when done. The slot
//! returns to the free list on the release that drops the count to zero.
//!
//! The pool is confined to the network worker, so counts are plain integers.
//!
//! ## Usage
//! ```rust
//! use overlay_protocol::core::pool::PacketPool;
//!
//! let mut pool = PacketPool::new();
//! let id = pool.acquire("KHL", true)?;
//! pool.packet_mut(id)?.write_child("TS", &[0, 0, 0, 0])?;
//! pool.retain(id)?; // second holder
//! pool.release(id)?;
//! pool.release(id)?; // back on the free list
//! assert_eq!(pool.live(), 0);
//! # Ok::<(), overlay_protocol::error::ProtocolError>(())
//! ```

use tracing::{debug, warn};

use crate::core::packet::{Packet, PacketType};
use crate::error::{ProtocolError, Result};

/// Slots allocated per slab
pub const SLAB_SIZE: usize = 256;

/// Handle to a pooled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u32);

impl PacketId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct Slot {
    packet: Packet,
    next_free: Option<u32>,
    live: bool,
}

/// Arena of packet slots with an intrusive free list.
#[derive(Debug, Default)]
pub struct PacketPool {
    slabs: Vec<Box<[Slot]>>,
    free_head: Option<u32>,
    free_count: usize,
    /// Upper bound on slabs; `None` grows without limit
    max_slabs: Option<usize>,
}

impl PacketPool {
    /// Create an empty pool; the first acquire allocates a slab.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with `initial_slabs` preallocated and an optional slab limit.
    pub fn with_limits(initial_slabs: usize, max_slabs: Option<usize>) -> Self {
        let mut pool = Self {
            max_slabs,
            ..Self::default()
        };
        for _ in 0..initial_slabs {
            if pool.grow().is_err() {
                break;
            }
        }
        pool
    }

    /// Acquire a tagged packet with one holder.
    pub fn acquire(&mut self, tag: &str, compound: bool) -> Result<PacketId> {
        let packet_type = PacketType::new(tag)?;
        self.acquire_typed(packet_type, compound)
    }

    pub fn acquire_typed(&mut self, packet_type: PacketType, compound: bool) -> Result<PacketId> {
        let id = self.pop_free()?;
        let packet = &mut self.slot_mut(id.0).packet;
        packet.set_type(packet_type);
        packet.set_compound(compound);
        Ok(id)
    }

    /// Acquire a packet with no tag yet, as used when parsing.
    pub fn acquire_untyped(&mut self) -> Result<PacketId> {
        self.pop_free()
    }

    /// Add a holder.
    pub fn retain(&mut self, id: PacketId) -> Result<()> {
        let slot = self.live_slot_mut(id)?;
        let count = slot.packet.ref_count();
        slot.packet.set_ref_count(count + 1);
        Ok(())
    }

    /// Drop a holder; the packet is reclaimed when none remain.
    ///
    /// Releasing a packet that is no longer held is a caller bug: it asserts
    /// in debug builds and is rejected with `InvalidPacketId` otherwise.
    pub fn release(&mut self, id: PacketId) -> Result<()> {
        let slot = self.live_slot_mut(id)?;
        let count = slot.packet.ref_count();
        debug_assert!(count > 0, "release of unreferenced packet {}", id.0);
        if count == 0 {
            warn!(packet = id.0, "Release of unreferenced packet ignored");
            return Err(ProtocolError::InvalidPacketId(id.0));
        }
        slot.packet.set_ref_count(count - 1);
        if count == 1 {
            self.reclaim(id.0);
        }
        Ok(())
    }

    pub fn get(&self, id: PacketId) -> Option<&Packet> {
        self.slot(id.0).filter(|s| s.live).map(|s| &s.packet)
    }

    pub fn get_mut(&mut self, id: PacketId) -> Option<&mut Packet> {
        self.slot_mut_checked(id.0)
            .filter(|s| s.live)
            .map(|s| &mut s.packet)
    }

    pub fn packet(&self, id: PacketId) -> Result<&Packet> {
        self.get(id).ok_or(ProtocolError::InvalidPacketId(id.0))
    }

    pub fn packet_mut(&mut self, id: PacketId) -> Result<&mut Packet> {
        self.get_mut(id).ok_or(ProtocolError::InvalidPacketId(id.0))
    }

    /// Total slots across all slabs.
    pub fn capacity(&self) -> usize {
        self.slabs.len() * SLAB_SIZE
    }

    /// Slots on the free list.
    pub fn available(&self) -> usize {
        self.free_count
    }

    /// Slots currently held.
    pub fn live(&self) -> usize {
        self.capacity() - self.free_count
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Free every slab. Packets still held at this point are leaked holders.
    pub fn clear(&mut self) {
        let live = self.live();
        if live > 0 {
            warn!(live, "Clearing packet pool with packets still held");
        }
        self.slabs.clear();
        self.free_head = None;
        self.free_count = 0;
    }

    fn pop_free(&mut self) -> Result<PacketId> {
        if self.free_head.is_none() {
            self.grow()?;
        }
        let index = self.free_head.ok_or(ProtocolError::PoolExhausted)?;
        let slot = self.slot_mut(index);
        let next = slot.next_free.take();
        slot.live = true;
        slot.packet.set_ref_count(1);
        self.free_head = next;
        self.free_count -= 1;
        Ok(PacketId(index))
    }

    fn reclaim(&mut self, index: u32) {
        let head = self.free_head;
        let slot = self.slot_mut(index);
        slot.packet.reset();
        slot.live = false;
        slot.next_free = head;
        self.free_head = Some(index);
        self.free_count += 1;
    }

    fn grow(&mut self) -> Result<()> {
        if let Some(max) = self.max_slabs {
            if self.slabs.len() >= max {
                warn!(slabs = self.slabs.len(), "Packet pool at slab limit");
                return Err(ProtocolError::PoolExhausted);
            }
        }

        let base = (self.slabs.len() * SLAB_SIZE) as u32;
        let mut slab: Vec<Slot> = (0..SLAB_SIZE).map(|_| Slot::default()).collect();

        // Link the new slots in front of the existing free list, lowest index first.
        let mut next = self.free_head;
        for (i, slot) in slab.iter_mut().enumerate().rev() {
            slot.next_free = next;
            next = Some(base + i as u32);
        }
        self.free_head = next;
        self.free_count += SLAB_SIZE;
        self.slabs.push(slab.into_boxed_slice());

        debug!(slabs = self.slabs.len(), "Packet pool grew");
        Ok(())
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        let index = index as usize;
        self.slabs
            .get(index / SLAB_SIZE)
            .map(|slab| &slab[index % SLAB_SIZE])
    }

    fn slot_mut_checked(&mut self, index: u32) -> Option<&mut Slot> {
        let index = index as usize;
        self.slabs
            .get_mut(index / SLAB_SIZE)
            .map(|slab| &mut slab[index % SLAB_SIZE])
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot {
        let index = index as usize;
        &mut self.slabs[index / SLAB_SIZE][index % SLAB_SIZE]
    }

    fn live_slot_mut(&mut self, id: PacketId) -> Result<&mut Slot> {
        self.slot_mut_checked(id.0)
            .filter(|s| s.live)
            .ok_or(ProtocolError::InvalidPacketId(id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_allocates_a_slab() {
        let mut pool = PacketPool::new();
        assert_eq!(pool.capacity(), 0);
        let id = pool.acquire("A", false).unwrap();
        assert_eq!(pool.slab_count(), 1);
        assert_eq!(pool.live(), 1);
        assert_eq!(pool.available(), SLAB_SIZE - 1);
        assert_eq!(pool.packet(id).unwrap().ref_count(), 1);
    }

    #[test]
    fn grows_by_whole_slabs() {
        let mut pool = PacketPool::new();
        let ids: Vec<_> = (0..SLAB_SIZE + 1)
            .map(|_| pool.acquire("A", false).unwrap())
            .collect();
        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.live(), SLAB_SIZE + 1);
        for id in ids {
            pool.release(id).unwrap();
        }
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.slab_count(), 2);
    }

    #[test]
    fn released_packet_is_reset_and_reused() {
        let mut pool = PacketPool::new();
        let id = pool.acquire("KHL", true).unwrap();
        pool.packet_mut(id).unwrap().write(b"payload");
        pool.release(id).unwrap();
        assert!(pool.get(id).is_none());

        let again = pool.acquire_untyped().unwrap();
        assert_eq!(again, id);
        let p = pool.packet(again).unwrap();
        assert!(p.is_empty());
        assert!(p.packet_type().is_empty());
        assert!(!p.is_compound());
    }

    #[test]
    fn shared_packet_survives_until_last_release() {
        let mut pool = PacketPool::new();
        let id = pool.acquire("A", false).unwrap();
        pool.retain(id).unwrap();
        pool.retain(id).unwrap();
        pool.release(id).unwrap();
        pool.release(id).unwrap();
        assert!(pool.get(id).is_some());
        pool.release(id).unwrap();
        assert!(pool.get(id).is_none());
        assert!(matches!(
            pool.retain(id),
            Err(ProtocolError::InvalidPacketId(_))
        ));
    }

    #[test]
    fn slab_limit_is_enforced() {
        let mut pool = PacketPool::with_limits(1, Some(1));
        for _ in 0..SLAB_SIZE {
            pool.acquire("A", false).unwrap();
        }
        assert!(matches!(
            pool.acquire("A", false),
            Err(ProtocolError::PoolExhausted)
        ));
    }

    #[test]
    fn invalid_tag_does_not_consume_a_slot() {
        let mut pool = PacketPool::new();
        assert!(pool.acquire("", false).is_err());
        assert_eq!(pool.live(), 0);
    }
}
