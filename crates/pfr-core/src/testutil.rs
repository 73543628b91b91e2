//! Test doubles shared by the unit tests
//!
//! In-memory flash and UFM emulators plus a deterministic stand-in for the
//! external hash/RSA engines. The hash spreads every input bit through the
//! digest so corruption tests behave like they would with a real digest;
//! the signature construction derives the expected signature from the key
//! and digest so fixtures can be "signed" without key material.

use std::vec::Vec;

use crate::container::{ImageBuilder, ImageFormat};
use crate::crypto::{self, HashEngine, HashType, RsaEngine, MAX_DIGEST_LEN};
use crate::error::{Error, Result};
use crate::flash::Flash;
use crate::keys::manifest::{KeyManifest, KEY_HASH_SIZE, MAX_KEY_ID};
use crate::keys::{RsaPublicKey, RSA_MAX_KEY_LENGTH};
use crate::pfm::{emit_pfm, RwRegion};
use crate::provision::{self, ProvisionConfig, RegionMap, ROOT_KEY_HASH_LEN};
use crate::ufm::{Ufm, UfmPage};

/// In-memory flash with recorded erase operations
pub struct TestFlash {
    memory: Vec<u8>,
    sector: u32,
    block: u32,
    /// Erase operations as (address, length)
    pub erases: Vec<(u32, u32)>,
}

impl TestFlash {
    pub fn new(size: usize) -> Self {
        Self {
            memory: std::vec![0xFF; size],
            sector: 0x1000,
            block: 0x10000,
            erases: Vec::new(),
        }
    }

    /// A device whose smallest erase granule is the 64 KiB block
    pub fn new_block_only(size: usize) -> Self {
        let mut flash = Self::new(size);
        flash.sector = flash.block;
        flash
    }

    /// Fill the whole device with a byte (simulates stale contents)
    pub fn fill(&mut self, byte: u8) {
        self.memory.fill(byte);
    }

    /// Directly place fixture bytes, bypassing write semantics
    pub fn program(&mut self, addr: u32, data: &[u8]) {
        let addr = addr as usize;
        self.memory[addr..addr + data.len()].copy_from_slice(data);
    }

    pub fn data(&self) -> &[u8] {
        &self.memory
    }
}

impl Flash for TestFlash {
    fn device_size(&self) -> u32 {
        self.memory.len() as u32
    }

    fn sector_size(&self) -> u32 {
        self.sector
    }

    fn block_size(&self) -> u32 {
        self.block
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let addr = addr as usize;
        if addr + buf.len() > self.memory.len() {
            return Err(Error::Io);
        }
        buf.copy_from_slice(&self.memory[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let addr = addr as usize;
        if addr + data.len() > self.memory.len() {
            return Err(Error::Io);
        }
        // NOR semantics: programming clears bits
        for (slot, byte) in self.memory[addr..addr + data.len()].iter_mut().zip(data) {
            *slot &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        if addr % self.sector != 0 || len % self.sector != 0 {
            return Err(Error::Io);
        }
        let addr = addr as usize;
        let len = len as usize;
        if addr + len > self.memory.len() {
            return Err(Error::Io);
        }
        self.memory[addr..addr + len].fill(0xFF);
        self.erases.push((addr as u32, len as u32));
        Ok(())
    }
}

/// In-memory UFM enforcing the OTP write contract
pub struct TestUfm {
    pages: [Vec<u8>; 2],
}

impl TestUfm {
    pub fn new() -> Self {
        Self {
            pages: [std::vec![0xFF; 512], std::vec![0xFF; 512]],
        }
    }

    fn page(&mut self, page: UfmPage) -> &mut Vec<u8> {
        match page {
            UfmPage::Provision => &mut self.pages[0],
            UfmPage::UpdateStatus => &mut self.pages[1],
        }
    }
}

impl Ufm for TestUfm {
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
        // Validate the whole write before committing anything
        for (old, new) in store[offset..offset + data.len()].iter().zip(data) {
            if old & new != *new {
                return Err(Error::UfmOtpViolation);
            }
        }
        store[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Deterministic streaming digest (FNV accumulate, splitmix expand)
pub struct TestHash {
    state: u64,
    ty: Option<HashType>,
    /// Completed digest computations
    pub finishes: usize,
}

impl TestHash {
    pub fn new() -> Self {
        Self {
            state: 0,
            ty: None,
            finishes: 0,
        }
    }
}

fn splitmix(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl HashEngine for TestHash {
    fn start(&mut self, ty: HashType) -> Result<()> {
        self.state = 0xCBF2_9CE4_8422_2325 ^ (ty.digest_len() as u64);
        self.ty = Some(ty);
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(0x100_0000_01B3);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<usize> {
        let ty = self.ty.take().ok_or(Error::Io)?;
        let len = ty.digest_len();
        if out.len() < len {
            return Err(Error::Io);
        }

        let mut state = self.state;
        for chunk in out[..len].chunks_mut(8) {
            let word = splitmix(&mut state).to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        self.finishes += 1;
        Ok(len)
    }
}

/// The signature the mock RSA engine expects for a key/digest pair
pub fn mock_signature(key: &RsaPublicKey, digest: &[u8]) -> Vec<u8> {
    let mut out = std::vec![0u8; key.mod_length as usize];
    let mut state = 0x5851_F42D_4C95_7F2D ^ (key.exponent as u64);
    for &byte in digest {
        state ^= byte as u64;
        state = state.wrapping_mul(0x100_0000_01B3);
    }
    for (i, slot) in out.iter_mut().enumerate() {
        state ^= key.modulus[i % RSA_MAX_KEY_LENGTH] as u64;
        *slot = (splitmix(&mut state) >> 24) as u8;
    }
    out
}

/// Mock RSA verification engine with a call counter
pub struct TestRsa {
    /// Signature verifications attempted
    pub calls: usize,
}

impl TestRsa {
    pub fn new() -> Self {
        Self { calls: 0 }
    }
}

impl RsaEngine for TestRsa {
    fn verify_signature(
        &mut self,
        key: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.calls += 1;
        if mock_signature(key, digest) != signature {
            return Err(Error::SignatureInvalid);
        }
        Ok(())
    }
}

/// Deterministic RSA-3072-shaped key from a seed
pub fn test_key(seed: u8, mod_length: u32) -> RsaPublicKey {
    let mut modulus = [0u8; RSA_MAX_KEY_LENGTH];
    let mut state = 0xA076_1D64_78BD_642F ^ (seed as u64);
    for slot in modulus[..mod_length as usize].iter_mut() {
        *slot = (splitmix(&mut state) >> 16) as u8;
    }
    RsaPublicKey {
        modulus,
        mod_length,
        exponent: 65537,
    }
}

/// The root key all test fixtures are chained to
pub fn test_root_key() -> RsaPublicKey {
    test_key(0xAA, 384)
}

/// A CSK derived from a seed
pub fn test_csk(seed: u8) -> RsaPublicKey {
    test_key(seed, 384)
}

/// Signing closure for [`ImageBuilder::build`] using the mock scheme
pub fn test_sign(key: &RsaPublicKey) -> impl Fn(&[u8]) -> Vec<u8> + '_ {
    move |bytes| {
        let mut hash = TestHash::new();
        let mut digest = [0u8; MAX_DIGEST_LEN];
        let len = crypto::hash_bytes(&mut hash, HashType::Sha256, bytes, &mut digest).unwrap();
        mock_signature(key, &digest[..len])
    }
}

/// Digest of a key blob with the given algorithm
pub fn key_digest(key: &RsaPublicKey, ty: HashType) -> ([u8; MAX_DIGEST_LEN], usize) {
    let mut hash = TestHash::new();
    let mut digest = [0u8; MAX_DIGEST_LEN];
    let len = crypto::hash_bytes(&mut hash, ty, &key.to_bytes(), &mut digest).unwrap();
    (digest, len)
}

/// Standard test region layout: BMC on a 1 MiB device, PCH on 512 KiB
///
/// The BMC staging window leaves room for the PCH capsule riding behind
/// the BMC capsule.
pub fn test_regions() -> (RegionMap, RegionMap) {
    (
        RegionMap {
            active: 0x0002_0000,
            recovery: 0x0008_0000,
            staging: 0x000A_0000,
        },
        RegionMap {
            active: 0x0001_0000,
            recovery: 0x0004_0000,
            staging: 0x0007_0000,
        },
    )
}

/// Provision a blank UFM with the test layout and test root key
pub fn test_provision(ufm: &mut TestUfm) {
    let (digest, len) = key_digest(&test_root_key(), provision::ROOT_KEY_HASH_TYPE);
    let mut root_key_hash = [0xFFu8; ROOT_KEY_HASH_LEN];
    root_key_hash[..len].copy_from_slice(&digest[..len]);

    let (bmc, pch) = test_regions();
    provision::provision(
        ufm,
        &ProvisionConfig {
            root_key_hash,
            bmc,
            pch,
        },
    )
    .unwrap();
}

/// Declarative firmware-image fixture
///
/// Builds a signed container with a PFM section (svn + RW regions) and any
/// number of content sections, signed with a seeded CSK.
pub struct ImageSpec {
    format: ImageFormat,
    svn: u8,
    rw_regions: Vec<RwRegion>,
    pfm_dest: u32,
    sections: Vec<(u32, Vec<u8>)>,
    key_seed: u8,
    key_id: u32,
}

impl ImageSpec {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            svn: 1,
            rw_regions: Vec::new(),
            pfm_dest: 0x9_F000,
            sections: std::vec![(0x5000, std::vec![0x11; 0x200])],
            key_seed: 1,
            key_id: 1,
        }
    }

    pub fn svn(mut self, svn: u8) -> Self {
        self.svn = svn;
        self
    }

    pub fn key(mut self, seed: u8, key_id: u32) -> Self {
        self.key_seed = seed;
        self.key_id = key_id;
        self
    }

    pub fn rw_region(mut self, region: RwRegion) -> Self {
        self.rw_regions.push(region);
        self
    }

    pub fn pfm_dest(mut self, addr: u32) -> Self {
        self.pfm_dest = addr;
        self
    }

    /// Replace the default content sections
    pub fn sections(mut self, sections: Vec<(u32, Vec<u8>)>) -> Self {
        self.sections = sections;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let csk = test_csk(self.key_seed);
        let pfm_payload = emit_pfm(self.svn, b"fw-0001\0", &self.rw_regions, &[]);

        let mut builder = ImageBuilder::new(self.format)
            .version_id("v01.00")
            .platform_id("pfr-test")
            .section_with_format(self.pfm_dest, ImageFormat::Pfm, &pfm_payload);
        for (start_addr, payload) in &self.sections {
            builder = builder.section(*start_addr, payload);
        }
        builder.build(csk.mod_length, &csk, self.key_id, test_sign(&csk))
    }
}

/// Build a signed key manifest slot image authorizing the given CSKs
pub fn build_key_manifest_slot(csks: &[(u8, &RsaPublicKey)]) -> Vec<u8> {
    let mut key_list = [[0xFFu8; KEY_HASH_SIZE]; MAX_KEY_ID as usize + 1];
    for (key_id, key) in csks {
        let (digest, len) = key_digest(key, HashType::Sha256);
        key_list[*key_id as usize][..len].copy_from_slice(&digest[..len]);
    }

    let manifest = KeyManifest {
        hash_type: HashType::Sha256,
        key_list,
    };

    let root = test_root_key();
    ImageBuilder::new(crate::container::ImageFormat::Keym)
        .version_id("keym-test")
        .platform_id("pfr-test")
        .section(0, &manifest.emit())
        .build(root.mod_length, &root, 0, test_sign(&root))
}
