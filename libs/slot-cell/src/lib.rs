// =====================================================================================
// SLOT CELL - SLOT STORE, SLOT PROVIDERS & SHIFT SCHEDULING
// =====================================================================================
//
// Slots come from one of two places depending on the clinic's slot mode:
// - local clinics expand staff-maintained shifts into windows on every read
// - 1C clinics mirror the schedule pushed by the external scheduler
//
// Both are presented through the same `SlotProvider` interface.
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    ImportStats, RawSlotRecord, ShiftError, SlotError, SlotFilters, SlotSource, SlotView,
    SlotWindow, UpsertOutcome,
};

pub use services::{
    expand_shift_to_slots, ExternalSlotProvider, LocalSlotProvider, ShiftService, SlotProvider,
    SlotProviderFactory, SlotQueryService, SlotStoreService,
};

pub use router::{slot_routes, SlotCellState};
