//! CCSDS secondary-header endianness filter, grounded in
//! `modules/filter/ccsds_end/fsw/src/sbn_f_ccsds_end.c` (supplemented
//! feature: the distilled spec.md does not name this filter, but
//! spec.md §4.3 describes the filter trait generically enough to host
//! it, and SPEC_FULL.md commits to it as a second built-in filter to
//! exercise chain composition).
//!
//! A CCSDS telemetry packet carries a 6-byte primary header followed,
//! for telemetry with a secondary header, by a 4-byte seconds field and
//! a 2-byte subseconds field. The C module swaps those two fields to
//! big-endian on the wire and back on receipt; `filter_send` and
//! `filter_recv` below do the identical byte-swap, since XOR-swapping
//! twice is the definition of a symmetric wire transform.

use crate::filter::{FilterContext, FilterModule, FilterResult};

const CCSDS_PRI_HDR_LEN: usize = 6;
const TYPE_TLM_MASK: u8 = 0x10;
const SEC_HDR_FLAG_MASK: u8 = 0x08;
const SECONDS_LEN: usize = 4;
const SUBSECONDS_LEN: usize = 2;

fn swap_secondary_header_endianness(payload: &mut [u8]) {
    if payload.len() < CCSDS_PRI_HDR_LEN {
        return;
    }
    let is_tlm = payload[0] & TYPE_TLM_MASK != 0;
    let has_sec_hdr = payload[0] & SEC_HDR_FLAG_MASK != 0;
    if !is_tlm || !has_sec_hdr {
        return;
    }
    let sec_start = CCSDS_PRI_HDR_LEN;
    let sec_end = sec_start + SECONDS_LEN;
    let subsec_end = sec_end + SUBSECONDS_LEN;
    if payload.len() < subsec_end {
        return;
    }
    payload[sec_start..sec_end].reverse();
    payload[sec_end..subsec_end].reverse();
}

pub struct CcsdsEndianFilter;

impl FilterModule for CcsdsEndianFilter {
    fn name(&self) -> &'static str {
        "ccsds_endian"
    }

    fn base_event_id(&self) -> u32 {
        0
    }

    fn version(&self) -> u32 {
        1
    }

    fn filter_send(&self, payload: &mut Vec<u8>, _ctx: &FilterContext) -> FilterResult {
        swap_secondary_header_endianness(payload);
        FilterResult::Success
    }

    fn filter_recv(&self, payload: &mut Vec<u8>, _ctx: &FilterContext) -> FilterResult {
        swap_secondary_header_endianness(payload);
        FilterResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Direction;

    fn ctx() -> FilterContext {
        FilterContext {
            processor_id: 1,
            spacecraft_id: 1,
            direction: Direction::Send,
        }
    }

    fn tlm_with_sec_hdr(seconds: [u8; 4], subseconds: [u8; 2]) -> Vec<u8> {
        let mut payload = vec![TYPE_TLM_MASK | SEC_HDR_FLAG_MASK, 0, 0, 0, 0, 0];
        payload.extend_from_slice(&seconds);
        payload.extend_from_slice(&subseconds);
        payload
    }

    #[test]
    fn swaps_seconds_and_subseconds_for_telemetry_with_secondary_header() {
        let filter = CcsdsEndianFilter;
        let mut payload = tlm_with_sec_hdr([0x01, 0x02, 0x03, 0x04], [0x05, 0x06]);
        filter.filter_send(&mut payload, &ctx());
        assert_eq!(&payload[6..10], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&payload[10..12], &[0x06, 0x05]);
    }

    #[test]
    fn send_then_recv_round_trips() {
        let filter = CcsdsEndianFilter;
        let original = tlm_with_sec_hdr([0xDE, 0xAD, 0xBE, 0xEF], [0xCA, 0xFE]);
        let mut payload = original.clone();
        filter.filter_send(&mut payload, &ctx());
        filter.filter_recv(&mut payload, &ctx());
        assert_eq!(payload, original);
    }

    #[test]
    fn non_telemetry_packet_is_untouched() {
        let filter = CcsdsEndianFilter;
        let mut payload = vec![0x00, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6];
        let before = payload.clone();
        filter.filter_send(&mut payload, &ctx());
        assert_eq!(payload, before);
    }

    #[test]
    fn short_payload_is_left_alone() {
        let filter = CcsdsEndianFilter;
        let mut payload = vec![TYPE_TLM_MASK | SEC_HDR_FLAG_MASK, 0, 0];
        filter.filter_send(&mut payload, &ctx());
        assert_eq!(payload, vec![TYPE_TLM_MASK | SEC_HDR_FLAG_MASK, 0, 0]);
    }
}
