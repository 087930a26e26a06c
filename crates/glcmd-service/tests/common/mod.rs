#![allow(dead_code)]

use std::rc::Rc;

use glcmd_protocol::CmdWriter;
use glcmd_service::{
    Decoder, DecoderConfig, ErrorCode, SharedResourceGroup, SoftwareDriver, VecSharedMemory,
};

pub const SHM_ID: u32 = 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A decoder attached to `group` over a handle to a shared software driver,
/// the way every context of one share group talks to the same driver.
pub fn decoder(group: &SharedResourceGroup, driver: &SoftwareDriver) -> anyhow::Result<Decoder> {
    init_tracing();
    let mut decoder = Decoder::new(
        DecoderConfig::default(),
        Box::new(driver.clone()),
        Rc::clone(group),
    );
    decoder.register_shared_memory(SHM_ID, Rc::new(VecSharedMemory::new(4096)))?;
    Ok(decoder)
}

#[track_caller]
pub fn run_ok(decoder: &mut Decoder, w: &CmdWriter) {
    let outcome = decoder.process_commands(w.as_entries());
    assert_eq!(outcome.result, ErrorCode::NoError, "batch failed: {outcome:?}");
    assert_eq!(outcome.entries_processed, w.len_entries());
}
