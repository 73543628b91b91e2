//! pfr-dummy - In-memory emulators for the PFR engine
//!
//! This crate provides backends that emulate the RoT's environment in
//! memory: NOR-flavored flash devices, the OTP UFM pages, the reset-line
//! and mailbox collaborators, and a software stand-in for the external
//! hash/RSA engines. It's useful for testing and for driving the engine
//! from host-side tooling without real hardware.

use std::collections::VecDeque;

use sha2::{Digest, Sha256, Sha384, Sha512};

use pfr_core::container::{ImageBuilder, ImageFormat};
use pfr_core::crypto::{HashEngine, HashType, RsaEngine};
use pfr_core::error::{Error, Result};
use pfr_core::flash::Flash;
use pfr_core::keys::manifest::{KeyManifest, KEY_HASH_SIZE, MAX_KEY_ID};
use pfr_core::keys::{RsaPublicKey, RSA_MAX_KEY_LENGTH};
use pfr_core::provision::{Domain, ROOT_KEY_HASH_LEN};
use pfr_core::state::{CpldStatus, HostCommand, Mailbox, MuxOwner, ResetControl};
use pfr_core::ufm::{Ufm, UfmPage};

/// Geometry for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Flash size in bytes
    pub size: usize,
    /// Sector size for the smallest erase
    pub sector_size: u32,
    /// Block size for the large erase
    pub block_size: u32,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            size: 16 * 1024 * 1024,
            sector_size: 4096,
            block_size: 65536,
        }
    }
}

/// Dummy flash device
///
/// Emulates NOR behavior: erase sets a range to 0xFF, programming only
/// clears bits. Erase operations are recorded for inspection.
pub struct DummyFlash {
    config: DummyConfig,
    data: Vec<u8>,
    /// Erase operations as (address, length)
    pub erases: Vec<(u32, u32)>,
}

impl DummyFlash {
    /// Create a dummy flash of the given size with default geometry
    pub fn new(size: usize) -> Self {
        Self::with_config(DummyConfig {
            size,
            ..DummyConfig::default()
        })
    }

    /// Create a dummy flash with explicit geometry
    pub fn with_config(config: DummyConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            erases: Vec::new(),
        }
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Fill the whole device with a byte (simulates stale contents)
    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }

    /// Directly place fixture bytes, bypassing program semantics
    pub fn program(&mut self, addr: u32, data: &[u8]) {
        let addr = addr as usize;
        self.data[addr..addr + data.len()].copy_from_slice(data);
    }
}

impl Flash for DummyFlash {
    fn device_size(&self) -> u32 {
        self.config.size as u32
    }

    fn sector_size(&self) -> u32 {
        self.config.sector_size
    }

    fn block_size(&self) -> u32 {
        self.config.block_size
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let addr = addr as usize;
        if addr + buf.len() > self.data.len() {
            return Err(Error::Io);
        }
        buf.copy_from_slice(&self.data[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let addr = addr as usize;
        if addr + data.len() > self.data.len() {
            return Err(Error::Io);
        }
        for (slot, byte) in self.data[addr..addr + data.len()].iter_mut().zip(data) {
            *slot &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        if addr % self.config.sector_size != 0 || len % self.config.sector_size != 0 {
            return Err(Error::Io);
        }
        let start = addr as usize;
        let end = start + len as usize;
        if end > self.data.len() {
            return Err(Error::Io);
        }
        self.data[start..end].fill(0xFF);
        self.erases.push((addr, len));
        Ok(())
    }
}

/// Dummy UFM store
///
/// Two 512-byte pages, erased to 0xFF at manufacture. Writes are checked
/// for the OTP contract before anything is committed.
pub struct DummyUfm {
    pages: [Vec<u8>; 2],
}

impl DummyUfm {
    /// Blank (unprovisioned) UFM
    pub fn new() -> Self {
        Self {
            pages: [vec![0xFF; 512], vec![0xFF; 512]],
        }
    }

    fn page(&mut self, page: UfmPage) -> &mut Vec<u8> {
        match page {
            UfmPage::Provision => &mut self.pages[0],
            UfmPage::UpdateStatus => &mut self.pages[1],
        }
    }

    /// Raw page contents
    pub fn page_data(&self, page: UfmPage) -> &[u8] {
        match page {
            UfmPage::Provision => &self.pages[0],
            UfmPage::UpdateStatus => &self.pages[1],
        }
    }
}

impl Default for DummyUfm {
    fn default() -> Self {
        Self::new()
    }
}

impl Ufm for DummyUfm {
    fn read(&mut self, page: UfmPage, offset: u32, buf: &mut [u8]) -> Result<()> {
        let store = self.page(page);
        let offset = offset as usize;
        if offset + buf.len() > store.len() {
            return Err(Error::Io);
        }
        buf.copy_from_slice(&store[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, page: UfmPage, offset: u32, data: &[u8]) -> Result<()> {
        let store = self.page(page);
        let offset = offset as usize;
        if offset + data.len() > store.len() {
            return Err(Error::Io);
        }
        for (old, new) in store[offset..offset + data.len()].iter().zip(data) {
            if old & new != *new {
                return Err(Error::UfmOtpViolation);
            }
        }
        store[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Software hash engine backed by the RustCrypto SHA-2 family
pub struct SoftHash {
    state: Option<HashState>,
}

enum HashState {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl SoftHash {
    /// Idle engine
    pub fn new() -> Self {
        Self { state: None }
    }
}

impl Default for SoftHash {
    fn default() -> Self {
        Self::new()
    }
}

impl HashEngine for SoftHash {
    fn start(&mut self, ty: HashType) -> Result<()> {
        self.state = Some(match ty {
            HashType::Sha256 => HashState::Sha256(Sha256::new()),
            HashType::Sha384 => HashState::Sha384(Sha384::new()),
            HashType::Sha512 => HashState::Sha512(Sha512::new()),
        });
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<()> {
        match self.state.as_mut().ok_or(Error::Io)? {
            HashState::Sha256(h) => h.update(data),
            HashState::Sha384(h) => h.update(data),
            HashState::Sha512(h) => h.update(data),
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<usize> {
        let state = self.state.take().ok_or(Error::Io)?;
        let digest: Vec<u8> = match state {
            HashState::Sha256(h) => h.finalize().to_vec(),
            HashState::Sha384(h) => h.finalize().to_vec(),
            HashState::Sha512(h) => h.finalize().to_vec(),
        };
        if out.len() < digest.len() {
            return Err(Error::Io);
        }
        out[..digest.len()].copy_from_slice(&digest);
        Ok(digest.len())
    }
}

/// The signature [`SoftRsa`] expects for a key/digest pair
///
/// A deterministic keyed construction standing in for the external RSA
/// engine: the SHA-256 of key material and digest, expanded with a counter
/// to the modulus length. Fixtures are "signed" by computing the same
/// expansion.
pub fn soft_signature(key: &RsaPublicKey, digest: &[u8]) -> Vec<u8> {
    let mut seed = Sha256::new();
    seed.update(&key.modulus[..key.mod_length as usize]);
    seed.update(key.exponent.to_le_bytes());
    seed.update(digest);
    let seed = seed.finalize();

    let mut out = Vec::with_capacity(key.mod_length as usize);
    let mut counter = 0u32;
    while out.len() < key.mod_length as usize {
        let mut block = Sha256::new();
        block.update(seed);
        block.update(counter.to_le_bytes());
        out.extend_from_slice(&block.finalize());
        counter += 1;
    }
    out.truncate(key.mod_length as usize);
    out
}

/// Sign a byte span the way [`SoftRsa`] verifies it
///
/// Suitable as the signing closure for
/// [`pfr_core::container::ImageBuilder::build`].
pub fn soft_sign(key: &RsaPublicKey, signed_span: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(signed_span);
    soft_signature(key, &digest)
}

/// Software RSA verification engine
pub struct SoftRsa {
    /// Signature verifications attempted
    pub calls: usize,
}

impl SoftRsa {
    /// Fresh engine
    pub fn new() -> Self {
        Self { calls: 0 }
    }
}

impl Default for SoftRsa {
    fn default() -> Self {
        Self::new()
    }
}

impl RsaEngine for SoftRsa {
    fn verify_signature(
        &mut self,
        key: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.calls += 1;
        if soft_signature(key, digest) != signature {
            return Err(Error::SignatureInvalid);
        }
        Ok(())
    }
}

/// Deterministic development key derived from a seed
///
/// The modulus is a SHA-256 chain over the seed, so tooling and tests can
/// name keys by seed without carrying key files around.
pub fn seeded_key(seed: u8, mod_length: u32) -> RsaPublicKey {
    let mut modulus = [0u8; RSA_MAX_KEY_LENGTH];
    let mut block = [seed; 32];
    let mut filled = 0;
    while filled < mod_length as usize {
        block = Sha256::digest(block).into();
        let take = usize::min(block.len(), mod_length as usize - filled);
        modulus[filled..filled + take].copy_from_slice(&block[..take]);
        filled += take;
    }
    RsaPublicKey {
        modulus,
        mod_length,
        exponent: 65537,
    }
}

/// The provisioned root-key-hash field for a root key
///
/// SHA-256 of the serialized key; the tail of the 48-byte field stays
/// unprogrammed.
pub fn provisioned_root_hash(key: &RsaPublicKey) -> [u8; ROOT_KEY_HASH_LEN] {
    let digest = Sha256::digest(key.to_bytes());
    let mut out = [0xFFu8; ROOT_KEY_HASH_LEN];
    out[..digest.len()].copy_from_slice(&digest);
    out
}

/// Build a signed key manifest slot authorizing the given CSKs
///
/// The slot image is signed with [`soft_sign`] under `root`, which is
/// also appended as the manifest's root key.
pub fn key_manifest_slot(root: &RsaPublicKey, csks: &[(u8, &RsaPublicKey)]) -> Vec<u8> {
    let mut key_list = [[0xFFu8; KEY_HASH_SIZE]; MAX_KEY_ID as usize + 1];
    for (key_id, csk) in csks {
        let digest = Sha256::digest(csk.to_bytes());
        key_list[*key_id as usize][..digest.len()].copy_from_slice(&digest);
    }

    let manifest = KeyManifest {
        hash_type: HashType::Sha256,
        key_list,
    };

    ImageBuilder::new(ImageFormat::Keym)
        .version_id("keym-01")
        .platform_id("dummy-platform")
        .section(0, &manifest.emit())
        .build(root.mod_length, root, 0, |span| soft_sign(root, span))
}

/// Recorded reset-line event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetEvent {
    /// BMC external reset toggled
    BmcExtRst(bool),
    /// BMC SRST toggled
    BmcSrst(bool),
    /// PCH reset toggled
    PchRst(bool),
    /// SPI-monitor mux switched
    SpiMux(Domain, MuxOwner),
}

/// Reset-line collaborator that records events and logs them
pub struct DummyPlatform {
    /// Events in occurrence order
    pub events: Vec<ResetEvent>,
    /// Microseconds spent in busy delays
    pub delayed_us: u64,
}

impl DummyPlatform {
    /// Fresh recorder
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            delayed_us: 0,
        }
    }
}

impl Default for DummyPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetControl for DummyPlatform {
    fn bmc_extrst(&mut self, assert: bool) {
        log::debug!("bmc_extrst({})", assert);
        self.events.push(ResetEvent::BmcExtRst(assert));
    }

    fn bmc_srst(&mut self, assert: bool) {
        log::debug!("bmc_srst({})", assert);
        self.events.push(ResetEvent::BmcSrst(assert));
    }

    fn pch_rst(&mut self, assert: bool) {
        log::debug!("pch_rst({})", assert);
        self.events.push(ResetEvent::PchRst(assert));
    }

    fn spi_mux(&mut self, domain: Domain, owner: MuxOwner) {
        log::debug!("spi_mux({:?}, {:?})", domain, owner);
        self.events.push(ResetEvent::SpiMux(domain, owner));
    }

    fn delay_us(&mut self, us: u32) {
        self.delayed_us += us as u64;
    }
}

/// Mailbox collaborator with a queued command stream
pub struct DummyMailbox {
    /// Commands the host has posted
    pub commands: VecDeque<HostCommand>,
    /// Status records published by the engine
    pub published: Vec<CpldStatus>,
}

impl DummyMailbox {
    /// Empty mailbox
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
            published: Vec::new(),
        }
    }

    /// Queue a host command
    pub fn post(&mut self, command: HostCommand) {
        self.commands.push_back(command);
    }
}

impl Default for DummyMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox for DummyMailbox {
    fn publish(&mut self, status: &CpldStatus) {
        self.published.push(status.clone());
    }

    fn poll_command(&mut self) -> Option<HostCommand> {
        self.commands.pop_front()
    }
}
