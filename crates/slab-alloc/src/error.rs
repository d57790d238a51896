use block_heap::{BlockId, TableError};
use snafu::Snafu;
use snafu_utils::Location;

/// Errors from creating an allocator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("{size} units cannot host the allocator, needed at least {required}"))]
    TooSmall {
        size: usize,
        required: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors from an allocation request.
///
/// All of them are expected steady states of a full or fragmented arena;
/// nothing is retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("block table is full, capacity={capacity}"))]
    CapacityExhausted {
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "largest block cannot serve the request, requested={requested}, available={available}"
    ))]
    InsufficientSpace {
        requested: usize,
        available: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid alignment: {alignment}"))]
    InvalidAlignment {
        alignment: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors from releasing an allocation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FreeError {
    #[snafu(display("handle {id} does not name a live allocation"))]
    StaleHandle {
        id: BlockId,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no live allocation starts at offset {offset}"))]
    UnknownOffset {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block header in front of offset {offset} is corrupted"))]
    CorruptedHeader {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors reported by the integrity checks.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CheckError {
    #[snafu(display("arena header is corrupted"))]
    CorruptedArenaHeader {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block header in front of offset {offset} is corrupted"))]
    CorruptedBlockHeader {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("offset index disagrees with the block table at offset {offset}"))]
    OffsetIndex {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("address chain ends at {end}, usable length is {usable}"))]
    RegionCoverage {
        end: usize,
        usable: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block table invariant violated"))]
    Table {
        #[snafu(source)]
        source: TableError,
        #[snafu(implicit)]
        location: Location,
    },
}
