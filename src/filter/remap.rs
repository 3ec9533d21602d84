//! Remap filter module, grounded in
//! `modules/filter/remap/fsw/src/sbn_f_remap.c`.
//!
//! The C module keeps a single global remap table shared by every peer
//! and consults it only from its `RemapMID` entry point; ordinary app
//! traffic passes through `FilterSend`/`FilterRecv` unchanged. This
//! implementation wraps an `Arc<Mutex<RemapTable>>` so it can be shared
//! between the peer's send and receive pipelines the way `App` shares its
//! table across nets (spec.md §5).

use std::sync::{Arc, Mutex};

use crate::filter::{FilterContext, FilterModule, FilterResult};
use crate::mid::Mid;
use crate::remap::{RemapOutcome, RemapTable};

pub struct RemapFilter {
    table: Arc<Mutex<RemapTable>>,
}

impl RemapFilter {
    pub fn new(table: Arc<Mutex<RemapTable>>) -> RemapFilter {
        RemapFilter { table }
    }
}

impl FilterModule for RemapFilter {
    fn name(&self) -> &'static str {
        "remap"
    }

    fn base_event_id(&self) -> u32 {
        0
    }

    fn version(&self) -> u32 {
        1
    }

    fn filter_send(&self, _payload: &mut Vec<u8>, _ctx: &FilterContext) -> FilterResult {
        FilterResult::Success
    }

    fn filter_recv(&self, _payload: &mut Vec<u8>, _ctx: &FilterContext) -> FilterResult {
        FilterResult::Success
    }

    fn remap_mid(&self, mid: Mid, ctx: &FilterContext) -> crate::error::SbnResult<Option<Mid>> {
        let table = self.table.lock().unwrap();
        Ok(match table.lookup(ctx.processor_id, mid) {
            RemapOutcome::Remap(to) => Some(to),
            RemapOutcome::Drop => None,
            RemapOutcome::PassThrough(mid) => Some(mid),
        })
    }
}
