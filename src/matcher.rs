//! Credibility Matcher: Percolator LP matcher priced from on-chain credibility.
//!
//! The engine invokes this program through its matcher CPI for every trade
//! against the bound LP. The quoted spread starts at the LP's minimum spread,
//! widens with inventory imbalance, and tightens as the market earns
//! credibility: insurance coverage of open interest, and slots survived since
//! the engine's admin was renounced.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

use solana_program::declare_id;

declare_id!("CredMatch1111111111111111111111111111111111");

/// Instruction tag constants, shared with off-chain callers.
#[path = "tags.rs"]
pub mod tags;

// 1. mod constants
pub mod constants {
    use crate::engine_view::{EngineHead, SlabHeader};
    use core::mem::{offset_of, size_of};

    pub const MATCHER_MAGIC: u64 = 0x4352_4544_4d41_5443; // "CREDMATC"
    pub const MATCHER_VERSION: u32 = 1;
    /// Context kind. 0 and 1 are the passive and vAMM matchers.
    pub const MATCHER_KIND_CREDIBILITY: u8 = 2;

    pub const MATCHER_ABI_VERSION: u32 = 1;
    pub const MATCHER_CONTEXT_PREFIX_LEN: usize = 64;
    pub const MATCHER_CONTEXT_LEN: usize = 320;
    pub const MATCHER_CALL_TAG: u8 = 0;
    pub const MATCHER_CALL_LEN: usize = 67;

    /// Persistent context region: bytes 64..320 of the context account.
    pub const CTX_OFF: usize = MATCHER_CONTEXT_PREFIX_LEN;
    pub const CTX_LEN: usize = MATCHER_CONTEXT_LEN - MATCHER_CONTEXT_PREFIX_LEN;

    // Matcher call ABI offsets (67-byte layout, written by the engine)
    // byte 0: tag (u8)
    // 1..9: req_id (u64)
    // 9..11: lp_idx (u16)
    // 11..19: lp_account_id (u64)
    // 19..27: oracle_price_e6 (u64)
    // 27..43: req_size (i128)
    // 43..67: reserved (must be zero)
    pub const CALL_OFF_TAG: usize = 0;
    pub const CALL_OFF_REQ_ID: usize = 1;
    pub const CALL_OFF_LP_IDX: usize = 9;
    pub const CALL_OFF_LP_ACCOUNT_ID: usize = 11;
    pub const CALL_OFF_ORACLE_PRICE: usize = 19;
    pub const CALL_OFF_REQ_SIZE: usize = 27;
    pub const CALL_OFF_PADDING: usize = 43;

    // Matcher return ABI offsets (64-byte prefix, read back by the engine)
    pub const RET_OFF_ABI_VERSION: usize = 0;
    pub const RET_OFF_FLAGS: usize = 4;
    pub const RET_OFF_EXEC_PRICE: usize = 8;
    pub const RET_OFF_EXEC_SIZE: usize = 16;
    pub const RET_OFF_REQ_ID: usize = 32;
    pub const RET_OFF_LP_ACCOUNT_ID: usize = 40;
    pub const RET_OFF_ORACLE_PRICE: usize = 48;
    pub const RET_OFF_RESERVED: usize = 56;

    // Context field offsets, relative to CTX_OFF
    pub const CTX_OFF_MAGIC: usize = 0;
    pub const CTX_OFF_VERSION: usize = 8;
    pub const CTX_OFF_KIND: usize = 12;
    pub const CTX_OFF_LP_PDA: usize = 16;
    pub const CTX_OFF_BASE_FEE: usize = 48;
    pub const CTX_OFF_MIN_SPREAD: usize = 52;
    pub const CTX_OFF_MAX_SPREAD: usize = 56;
    pub const CTX_OFF_IMBALANCE_K: usize = 60;
    pub const CTX_OFF_LIQUIDITY: usize = 64;
    pub const CTX_OFF_MAX_FILL: usize = 80;
    pub const CTX_OFF_INVENTORY: usize = 96;
    pub const CTX_OFF_LAST_ORACLE: usize = 112;
    pub const CTX_OFF_LAST_EXEC: usize = 120;
    pub const CTX_OFF_MAX_INVENTORY: usize = 128;
    pub const CTX_OFF_INSURANCE_SNAPSHOT: usize = 144;
    pub const CTX_OFF_TOTAL_OI_SNAPSHOT: usize = 160;
    pub const CTX_OFF_MARKET_AGE: usize = 176;
    pub const CTX_OFF_LAST_DEFICIT: usize = 184;
    pub const CTX_OFF_SNAPSHOT_SLOT: usize = 192;
    pub const CTX_OFF_AGE_HALFLIFE: usize = 200;
    pub const CTX_OFF_INSURANCE_WEIGHT: usize = 208;
    pub const CTX_OFF_ENGINE_SLAB: usize = 212;
    /// 1 if the last refresh saw the engine admin renounced
    pub const CTX_OFF_ADMIN_RENOUNCED: usize = 244;
    pub const CTX_OFF_RESERVED: usize = 245;

    // Init instruction: tag + 4 x u32 + 3 x u128 + u64 + u32
    pub const INIT_LEN: usize = 77;

    pub const BPS_DENOM: u128 = 10_000;
    /// Ceiling on max_spread_bps + base_fee_bps.
    pub const MAX_TOTAL_BPS: u32 = 9_000;
    pub const MAX_FEE_BPS: u32 = 1_000;

    // Engine slab layout (SBF build of percolator-prog).
    // Header: magic, version, bump, padding, admin, pending_admin, reserved.
    pub const ENGINE_MAGIC: u64 = 0x504552434f4c4154; // "PERCOLAT"
    pub const ENGINE_HEADER_LEN: usize = size_of::<SlabHeader>();
    /// align_up(HEADER_LEN + CONFIG_LEN, 8) with the SBF MarketConfig (496 bytes).
    pub const ENGINE_OFF: usize = 600;
    /// RiskEngine.insurance_fund.balance
    pub const ENGINE_INSURANCE_OFF: usize = ENGINE_OFF + offset_of!(EngineHead, insurance_balance);
    /// RiskEngine.total_open_interest
    pub const ENGINE_TOTAL_OI_OFF: usize = ENGINE_OFF + offset_of!(EngineHead, total_open_interest);
    pub const ENGINE_MIN_LEN: usize = ENGINE_OFF + size_of::<EngineHead>();
}

// 1b. Pure verification helpers (Kani-provable predicates used by processor)
pub mod verify {
    use crate::constants::{MATCHER_CONTEXT_LEN, MAX_FEE_BPS, MAX_TOTAL_BPS};
    use crate::matcher_abi::{FLAG_PARTIAL_OK, FLAG_VALID};
    use crate::state::MatcherParams;

    #[inline]
    pub fn len_ok(actual: usize, need: usize) -> bool {
        actual >= need
    }

    #[inline]
    pub fn signer_ok(is_signer: bool) -> bool {
        is_signer
    }

    #[inline]
    pub fn writable_ok(is_writable: bool) -> bool {
        is_writable
    }

    #[inline]
    pub fn ctx_len_sufficient(len: usize) -> bool {
        len >= MATCHER_CONTEXT_LEN
    }

    /// Stored LP PDA must be set and equal to the signing PDA.
    #[inline]
    pub fn lp_pda_ok(stored: [u8; 32], signer: [u8; 32]) -> bool {
        stored != [0u8; 32] && stored == signer
    }

    #[inline]
    pub fn engine_slab_ok(stored: [u8; 32], provided: [u8; 32]) -> bool {
        stored != [0u8; 32] && stored == provided
    }

    #[inline]
    pub fn call_reserved_ok(reserved: &[u8]) -> bool {
        reserved.iter().all(|&b| b == 0)
    }

    /// Admin authority is relinquished only when no admin and no pending
    /// admin remain; a pending admin could still accept the role.
    #[inline]
    pub fn admin_renounced(admin: [u8; 32], pending_admin: [u8; 32]) -> bool {
        admin == [0u8; 32] && pending_admin == [0u8; 32]
    }

    /// Init parameter bounds. Also guarantees the imbalance product
    /// `imbalance_k_bps * |inventory|` fits in u128 for any inventory
    /// within the cap.
    pub fn init_params_ok(p: &MatcherParams) -> bool {
        if p.min_spread_bps == 0 || p.min_spread_bps > p.max_spread_bps {
            return false;
        }
        if p.base_fee_bps > MAX_FEE_BPS {
            return false;
        }
        if (p.max_spread_bps as u64) + (p.base_fee_bps as u64) > MAX_TOTAL_BPS as u64 {
            return false;
        }
        if p.insurance_weight_bps > MAX_TOTAL_BPS {
            return false;
        }
        if p.liquidity_notional_e6 == 0 {
            return false;
        }
        if p.max_inventory_abs > i128::MAX as u128 {
            return false;
        }
        (p.imbalance_k_bps as u128)
            .checked_mul(p.max_inventory_abs)
            .is_some()
    }

    /// Return flags for a fill: PARTIAL_OK whenever less than requested.
    #[inline]
    pub fn flags_for_fill(fill_abs: u128, req_abs: u128) -> u32 {
        if fill_abs < req_abs || fill_abs == 0 {
            FLAG_VALID | FLAG_PARTIAL_OK
        } else {
            FLAG_VALID
        }
    }
}

// 2. mod matcher_abi
pub mod matcher_abi {
    use crate::constants::*;
    use solana_program::program_error::ProgramError;

    /// Matcher return flags
    pub const FLAG_VALID: u32 = 1; // bit0: response is valid
    pub const FLAG_PARTIAL_OK: u32 = 2; // bit1: partial fill including zero allowed
    pub const FLAG_REJECTED: u32 = 4; // bit2: trade rejected by matcher

    #[inline]
    fn le<const N: usize>(data: &[u8], off: usize) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&data[off..off + N]);
        buf
    }

    /// Trade request forwarded by the engine.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MatcherCall {
        pub req_id: u64,
        pub lp_idx: u16,
        pub lp_account_id: u64,
        pub oracle_price_e6: u64,
        /// Positive = user buys (LP sells), negative = user sells (LP buys).
        pub req_size: i128,
    }

    impl MatcherCall {
        /// Parse the full call payload, tag byte included.
        pub fn parse(data: &[u8]) -> Result<Self, ProgramError> {
            if data.len() < MATCHER_CALL_LEN || data[CALL_OFF_TAG] != MATCHER_CALL_TAG {
                return Err(ProgramError::InvalidInstructionData);
            }
            if !crate::verify::call_reserved_ok(&data[CALL_OFF_PADDING..MATCHER_CALL_LEN]) {
                return Err(ProgramError::InvalidInstructionData);
            }
            Ok(Self {
                req_id: u64::from_le_bytes(le(data, CALL_OFF_REQ_ID)),
                lp_idx: u16::from_le_bytes(le(data, CALL_OFF_LP_IDX)),
                lp_account_id: u64::from_le_bytes(le(data, CALL_OFF_LP_ACCOUNT_ID)),
                oracle_price_e6: u64::from_le_bytes(le(data, CALL_OFF_ORACLE_PRICE)),
                req_size: i128::from_le_bytes(le(data, CALL_OFF_REQ_SIZE)),
            })
        }

        pub fn encode(&self) -> [u8; MATCHER_CALL_LEN] {
            let mut data = [0u8; MATCHER_CALL_LEN];
            data[CALL_OFF_TAG] = MATCHER_CALL_TAG;
            data[CALL_OFF_REQ_ID..CALL_OFF_LP_IDX].copy_from_slice(&self.req_id.to_le_bytes());
            data[CALL_OFF_LP_IDX..CALL_OFF_LP_ACCOUNT_ID]
                .copy_from_slice(&self.lp_idx.to_le_bytes());
            data[CALL_OFF_LP_ACCOUNT_ID..CALL_OFF_ORACLE_PRICE]
                .copy_from_slice(&self.lp_account_id.to_le_bytes());
            data[CALL_OFF_ORACLE_PRICE..CALL_OFF_REQ_SIZE]
                .copy_from_slice(&self.oracle_price_e6.to_le_bytes());
            data[CALL_OFF_REQ_SIZE..CALL_OFF_PADDING].copy_from_slice(&self.req_size.to_le_bytes());
            data
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MatcherReturn {
        pub abi_version: u32,
        pub flags: u32,
        pub exec_price_e6: u64,
        pub exec_size: i128,
        pub req_id: u64,
        pub lp_account_id: u64,
        pub oracle_price_e6: u64,
        pub reserved: u64,
    }

    impl MatcherReturn {
        /// The engine's acceptance rules for a matcher return, as applied
        /// after the CPI completes. Used by callers that simulate the engine.
        pub fn accepted_for(&self, call: &MatcherCall) -> bool {
            if self.abi_version != MATCHER_ABI_VERSION
                || self.flags & FLAG_VALID == 0
                || self.flags & FLAG_REJECTED != 0
            {
                return false;
            }
            if self.req_id != call.req_id
                || self.lp_account_id != call.lp_account_id
                || self.oracle_price_e6 != call.oracle_price_e6
                || self.reserved != 0
            {
                return false;
            }
            if self.exec_price_e6 == 0 {
                return false;
            }
            if self.exec_size == 0 {
                return self.flags & FLAG_PARTIAL_OK != 0;
            }
            if self.exec_size.signum() != call.req_size.signum() {
                return false;
            }
            if self.exec_size.unsigned_abs() > call.req_size.unsigned_abs() {
                return false;
            }
            self.exec_size.unsigned_abs() == call.req_size.unsigned_abs()
                || self.flags & FLAG_PARTIAL_OK != 0
        }

        pub fn read_from(ctx: &[u8]) -> Result<Self, ProgramError> {
            if ctx.len() < MATCHER_CONTEXT_PREFIX_LEN {
                return Err(ProgramError::InvalidAccountData);
            }
            Ok(Self {
                abi_version: u32::from_le_bytes(le(ctx, RET_OFF_ABI_VERSION)),
                flags: u32::from_le_bytes(le(ctx, RET_OFF_FLAGS)),
                exec_price_e6: u64::from_le_bytes(le(ctx, RET_OFF_EXEC_PRICE)),
                exec_size: i128::from_le_bytes(le(ctx, RET_OFF_EXEC_SIZE)),
                req_id: u64::from_le_bytes(le(ctx, RET_OFF_REQ_ID)),
                lp_account_id: u64::from_le_bytes(le(ctx, RET_OFF_LP_ACCOUNT_ID)),
                oracle_price_e6: u64::from_le_bytes(le(ctx, RET_OFF_ORACLE_PRICE)),
                reserved: u64::from_le_bytes(le(ctx, RET_OFF_RESERVED)),
            })
        }

        /// Write into the 64-byte return prefix of the context account.
        pub fn write_to(&self, ctx: &mut [u8]) -> Result<(), ProgramError> {
            if ctx.len() < MATCHER_CONTEXT_PREFIX_LEN {
                return Err(ProgramError::AccountDataTooSmall);
            }
            ctx[RET_OFF_ABI_VERSION..RET_OFF_FLAGS].copy_from_slice(&self.abi_version.to_le_bytes());
            ctx[RET_OFF_FLAGS..RET_OFF_EXEC_PRICE].copy_from_slice(&self.flags.to_le_bytes());
            ctx[RET_OFF_EXEC_PRICE..RET_OFF_EXEC_SIZE]
                .copy_from_slice(&self.exec_price_e6.to_le_bytes());
            ctx[RET_OFF_EXEC_SIZE..RET_OFF_REQ_ID].copy_from_slice(&self.exec_size.to_le_bytes());
            ctx[RET_OFF_REQ_ID..RET_OFF_LP_ACCOUNT_ID].copy_from_slice(&self.req_id.to_le_bytes());
            ctx[RET_OFF_LP_ACCOUNT_ID..RET_OFF_ORACLE_PRICE]
                .copy_from_slice(&self.lp_account_id.to_le_bytes());
            ctx[RET_OFF_ORACLE_PRICE..RET_OFF_RESERVED]
                .copy_from_slice(&self.oracle_price_e6.to_le_bytes());
            ctx[RET_OFF_RESERVED..MATCHER_CONTEXT_PREFIX_LEN]
                .copy_from_slice(&self.reserved.to_le_bytes());
            Ok(())
        }
    }
}

// 3. mod error
pub mod error {
    use solana_program::program_error::ProgramError;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum MatcherError {
        /// Context region too short, or magic/kind mismatch
        InvalidLayout,
        InvalidVersion,
        AlreadyInitialized,
        ArithmeticOverflow,
        /// Execution price rounded to zero or exceeded u64
        ExecPriceOutOfRange,
        InvalidParams,
        LpPdaMismatch,
        ExpectedSigner,
        ExpectedWritable,
        /// Engine slab too short or magic mismatch
        InvalidEngineSlab,
        /// Slab passed to UpdateCredibility is not the one bound at Init
        EngineSlabMismatch,
        InvalidOraclePrice,
        InvalidRequestSize,
    }

    impl From<MatcherError> for ProgramError {
        fn from(e: MatcherError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }
}

// 4. mod ix
pub mod ix {
    use crate::matcher_abi::MatcherCall;
    use crate::state::MatcherParams;
    use alloc::vec::Vec;
    use solana_program::program_error::ProgramError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Instruction {
        /// Price a trade for the bound LP. CPI from the engine only.
        /// Accounts: [lp_pda(signer), matcher_ctx(writable)]
        Match(MatcherCall),
        /// One-time context setup.
        /// Accounts: [lp_pda, matcher_ctx(writable), engine_slab]
        Init { params: MatcherParams },
        /// Permissionless snapshot refresh from the engine slab.
        /// Accounts: [matcher_ctx(writable), engine_slab, clock]
        UpdateCredibility,
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input
                .split_first()
                .ok_or(ProgramError::InvalidInstructionData)?;

            use crate::tags::*;
            match tag {
                TAG_MATCH => Ok(Instruction::Match(MatcherCall::parse(input)?)),
                TAG_INIT => {
                    let base_fee_bps = u32::from_le_bytes(take(&mut rest)?);
                    let min_spread_bps = u32::from_le_bytes(take(&mut rest)?);
                    let max_spread_bps = u32::from_le_bytes(take(&mut rest)?);
                    let imbalance_k_bps = u32::from_le_bytes(take(&mut rest)?);
                    let liquidity_notional_e6 = u128::from_le_bytes(take(&mut rest)?);
                    let max_fill_abs = u128::from_le_bytes(take(&mut rest)?);
                    let max_inventory_abs = u128::from_le_bytes(take(&mut rest)?);
                    let age_halflife_slots = u64::from_le_bytes(take(&mut rest)?);
                    let insurance_weight_bps = u32::from_le_bytes(take(&mut rest)?);
                    Ok(Instruction::Init {
                        params: MatcherParams {
                            base_fee_bps,
                            min_spread_bps,
                            max_spread_bps,
                            imbalance_k_bps,
                            liquidity_notional_e6,
                            max_fill_abs,
                            max_inventory_abs,
                            age_halflife_slots,
                            insurance_weight_bps,
                        },
                    })
                }
                TAG_UPDATE_CREDIBILITY => Ok(Instruction::UpdateCredibility),
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }

        /// Serialize for off-chain callers and tests.
        pub fn pack(&self) -> Vec<u8> {
            use crate::tags::*;
            match self {
                Instruction::Match(call) => call.encode().to_vec(),
                Instruction::Init { params: p } => {
                    let mut data = Vec::with_capacity(crate::constants::INIT_LEN);
                    data.push(TAG_INIT);
                    data.extend_from_slice(&p.base_fee_bps.to_le_bytes());
                    data.extend_from_slice(&p.min_spread_bps.to_le_bytes());
                    data.extend_from_slice(&p.max_spread_bps.to_le_bytes());
                    data.extend_from_slice(&p.imbalance_k_bps.to_le_bytes());
                    data.extend_from_slice(&p.liquidity_notional_e6.to_le_bytes());
                    data.extend_from_slice(&p.max_fill_abs.to_le_bytes());
                    data.extend_from_slice(&p.max_inventory_abs.to_le_bytes());
                    data.extend_from_slice(&p.age_halflife_slots.to_le_bytes());
                    data.extend_from_slice(&p.insurance_weight_bps.to_le_bytes());
                    data
                }
                Instruction::UpdateCredibility => alloc::vec![TAG_UPDATE_CREDIBILITY],
            }
        }
    }

    fn take<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], ProgramError> {
        if input.len() < N {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(N);
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        *input = rest;
        Ok(buf)
    }
}

// 5. mod accounts
pub mod accounts {
    use crate::error::MatcherError;
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if !crate::verify::len_ok(accounts.len(), n) {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !crate::verify::signer_ok(ai.is_signer) {
            return Err(MatcherError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !crate::verify::writable_ok(ai.is_writable) {
            return Err(MatcherError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IncorrectProgramId);
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(())
    }

    /// Context account must be ours and large enough for prefix + context.
    pub fn expect_matcher_ctx(program_id: &Pubkey, ai: &AccountInfo) -> Result<(), ProgramError> {
        expect_owner(ai, program_id)?;
        if !crate::verify::ctx_len_sufficient(ai.data_len()) {
            return Err(ProgramError::AccountDataTooSmall);
        }
        Ok(())
    }
}

// 6. mod state
pub mod state {
    use crate::constants::*;
    use crate::error::MatcherError;
    use solana_program::pubkey::Pubkey;

    #[inline]
    fn le<const N: usize>(ctx: &[u8], off: usize) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&ctx[off..off + N]);
        buf
    }

    #[inline]
    fn put(ctx: &mut [u8], off: usize, bytes: &[u8]) {
        ctx[off..off + bytes.len()].copy_from_slice(bytes);
    }

    /// Borrow the persistent context region out of the full account data.
    pub fn ctx_region(data: &[u8]) -> Result<&[u8], MatcherError> {
        data.get(CTX_OFF..CTX_OFF + CTX_LEN)
            .ok_or(MatcherError::InvalidLayout)
    }

    pub fn ctx_region_mut(data: &mut [u8]) -> Result<&mut [u8], MatcherError> {
        data.get_mut(CTX_OFF..CTX_OFF + CTX_LEN)
            .ok_or(MatcherError::InvalidLayout)
    }

    /// Pricing parameters fixed at Init.
    ///
    /// Nothing after Init writes these bytes: Match and UpdateCredibility
    /// only see `&MatcherParams` and persist through [`LiveState::write_to`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MatcherParams {
        /// Trading fee added on top of the spread
        pub base_fee_bps: u32,
        /// Spread floor before credibility discounts
        pub min_spread_bps: u32,
        /// Spread ceiling
        pub max_spread_bps: u32,
        /// Imbalance multiplier
        pub imbalance_k_bps: u32,
        /// Quoting depth; scales the imbalance cost
        pub liquidity_notional_e6: u128,
        /// Maximum |exec_size| per call (0 = zero fill only)
        pub max_fill_abs: u128,
        /// Hard cap on |inventory|
        pub max_inventory_abs: u128,
        /// Age at which the age discount reaches half of min_spread_bps
        pub age_halflife_slots: u64,
        /// Discount granted at full insurance coverage
        pub insurance_weight_bps: u32,
    }

    impl MatcherParams {
        pub fn validate(&self) -> Result<(), MatcherError> {
            if !crate::verify::init_params_ok(self) {
                return Err(MatcherError::InvalidParams);
            }
            Ok(())
        }

        fn read_from(ctx: &[u8]) -> Self {
            Self {
                base_fee_bps: u32::from_le_bytes(le(ctx, CTX_OFF_BASE_FEE)),
                min_spread_bps: u32::from_le_bytes(le(ctx, CTX_OFF_MIN_SPREAD)),
                max_spread_bps: u32::from_le_bytes(le(ctx, CTX_OFF_MAX_SPREAD)),
                imbalance_k_bps: u32::from_le_bytes(le(ctx, CTX_OFF_IMBALANCE_K)),
                liquidity_notional_e6: u128::from_le_bytes(le(ctx, CTX_OFF_LIQUIDITY)),
                max_fill_abs: u128::from_le_bytes(le(ctx, CTX_OFF_MAX_FILL)),
                max_inventory_abs: u128::from_le_bytes(le(ctx, CTX_OFF_MAX_INVENTORY)),
                age_halflife_slots: u64::from_le_bytes(le(ctx, CTX_OFF_AGE_HALFLIFE)),
                insurance_weight_bps: u32::from_le_bytes(le(ctx, CTX_OFF_INSURANCE_WEIGHT)),
            }
        }

        fn write_to(&self, ctx: &mut [u8]) {
            put(ctx, CTX_OFF_BASE_FEE, &self.base_fee_bps.to_le_bytes());
            put(ctx, CTX_OFF_MIN_SPREAD, &self.min_spread_bps.to_le_bytes());
            put(ctx, CTX_OFF_MAX_SPREAD, &self.max_spread_bps.to_le_bytes());
            put(ctx, CTX_OFF_IMBALANCE_K, &self.imbalance_k_bps.to_le_bytes());
            put(ctx, CTX_OFF_LIQUIDITY, &self.liquidity_notional_e6.to_le_bytes());
            put(ctx, CTX_OFF_MAX_FILL, &self.max_fill_abs.to_le_bytes());
            put(ctx, CTX_OFF_MAX_INVENTORY, &self.max_inventory_abs.to_le_bytes());
            put(ctx, CTX_OFF_AGE_HALFLIFE, &self.age_halflife_slots.to_le_bytes());
            put(ctx, CTX_OFF_INSURANCE_WEIGHT, &self.insurance_weight_bps.to_le_bytes());
        }
    }

    /// Fields mutated by Match and UpdateCredibility.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LiveState {
        /// LP net position from fills (positive = long)
        pub inventory: i128,
        pub last_oracle_price_e6: u64,
        pub last_exec_price_e6: u64,
        pub insurance_snapshot: u128,
        pub total_oi_snapshot: u128,
        pub market_age_slots: u64,
        pub last_deficit_slot: u64,
        /// Slot of the last refresh; 0 = never refreshed
        pub snapshot_slot: u64,
        /// Whether the last refresh saw the engine admin renounced
        pub admin_renounced_at_snapshot: bool,
    }

    impl LiveState {
        fn read_from(ctx: &[u8]) -> Self {
            Self {
                inventory: i128::from_le_bytes(le(ctx, CTX_OFF_INVENTORY)),
                last_oracle_price_e6: u64::from_le_bytes(le(ctx, CTX_OFF_LAST_ORACLE)),
                last_exec_price_e6: u64::from_le_bytes(le(ctx, CTX_OFF_LAST_EXEC)),
                insurance_snapshot: u128::from_le_bytes(le(ctx, CTX_OFF_INSURANCE_SNAPSHOT)),
                total_oi_snapshot: u128::from_le_bytes(le(ctx, CTX_OFF_TOTAL_OI_SNAPSHOT)),
                market_age_slots: u64::from_le_bytes(le(ctx, CTX_OFF_MARKET_AGE)),
                last_deficit_slot: u64::from_le_bytes(le(ctx, CTX_OFF_LAST_DEFICIT)),
                snapshot_slot: u64::from_le_bytes(le(ctx, CTX_OFF_SNAPSHOT_SLOT)),
                admin_renounced_at_snapshot: ctx[CTX_OFF_ADMIN_RENOUNCED] != 0,
            }
        }

        /// Persist live fields only. The header and static parameter
        /// ranges of `ctx` are left as they are.
        pub fn write_to(&self, ctx: &mut [u8]) -> Result<(), MatcherError> {
            if ctx.len() < CTX_LEN {
                return Err(MatcherError::InvalidLayout);
            }
            put(ctx, CTX_OFF_INVENTORY, &self.inventory.to_le_bytes());
            put(ctx, CTX_OFF_LAST_ORACLE, &self.last_oracle_price_e6.to_le_bytes());
            put(ctx, CTX_OFF_LAST_EXEC, &self.last_exec_price_e6.to_le_bytes());
            put(ctx, CTX_OFF_INSURANCE_SNAPSHOT, &self.insurance_snapshot.to_le_bytes());
            put(ctx, CTX_OFF_TOTAL_OI_SNAPSHOT, &self.total_oi_snapshot.to_le_bytes());
            put(ctx, CTX_OFF_MARKET_AGE, &self.market_age_slots.to_le_bytes());
            put(ctx, CTX_OFF_LAST_DEFICIT, &self.last_deficit_slot.to_le_bytes());
            put(ctx, CTX_OFF_SNAPSHOT_SLOT, &self.snapshot_slot.to_le_bytes());
            ctx[CTX_OFF_ADMIN_RENOUNCED] = self.admin_renounced_at_snapshot as u8;
            Ok(())
        }
    }

    /// Matcher context stored at offset 64 of the context account.
    ///
    /// Header and parameters are private: a context is either decoded from an
    /// initialized account or built by [`MatcherContext::new`] for Init.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MatcherContext {
        magic: u64,
        version: u32,
        kind: u8,
        lp_pda: [u8; 32],
        engine_slab: [u8; 32],
        params: MatcherParams,
        pub live: LiveState,
    }

    impl MatcherContext {
        pub fn new(lp_pda: &Pubkey, engine_slab: &Pubkey, params: MatcherParams) -> Self {
            Self {
                magic: MATCHER_MAGIC,
                version: MATCHER_VERSION,
                kind: MATCHER_KIND_CREDIBILITY,
                lp_pda: lp_pda.to_bytes(),
                engine_slab: engine_slab.to_bytes(),
                params,
                live: LiveState::default(),
            }
        }

        pub fn is_initialized(ctx: &[u8]) -> bool {
            ctx.len() >= 8 && u64::from_le_bytes(le(ctx, CTX_OFF_MAGIC)) == MATCHER_MAGIC
        }

        pub fn read_from(ctx: &[u8]) -> Result<Self, MatcherError> {
            if ctx.len() < CTX_LEN {
                return Err(MatcherError::InvalidLayout);
            }
            let magic = u64::from_le_bytes(le(ctx, CTX_OFF_MAGIC));
            let kind = ctx[CTX_OFF_KIND];
            if magic != MATCHER_MAGIC || kind != MATCHER_KIND_CREDIBILITY {
                return Err(MatcherError::InvalidLayout);
            }
            let version = u32::from_le_bytes(le(ctx, CTX_OFF_VERSION));
            if version != MATCHER_VERSION {
                return Err(MatcherError::InvalidVersion);
            }

            Ok(Self {
                magic,
                version,
                kind,
                lp_pda: le(ctx, CTX_OFF_LP_PDA),
                engine_slab: le(ctx, CTX_OFF_ENGINE_SLAB),
                params: MatcherParams::read_from(ctx),
                live: LiveState::read_from(ctx),
            })
        }

        /// Write every field, zeroing padding and reserved bytes. Only Init
        /// persists a context this way.
        pub fn write_to(&self, ctx: &mut [u8]) -> Result<(), MatcherError> {
            if ctx.len() < CTX_LEN {
                return Err(MatcherError::InvalidLayout);
            }
            put(ctx, CTX_OFF_MAGIC, &self.magic.to_le_bytes());
            put(ctx, CTX_OFF_VERSION, &self.version.to_le_bytes());
            ctx[CTX_OFF_KIND] = self.kind;
            ctx[CTX_OFF_KIND + 1..CTX_OFF_LP_PDA].fill(0);
            put(ctx, CTX_OFF_LP_PDA, &self.lp_pda);
            self.params.write_to(ctx);
            self.live.write_to(ctx)?;
            put(ctx, CTX_OFF_ENGINE_SLAB, &self.engine_slab);
            ctx[CTX_OFF_RESERVED..CTX_LEN].fill(0);
            Ok(())
        }

        pub fn params(&self) -> &MatcherParams {
            &self.params
        }

        pub fn magic(&self) -> u64 {
            self.magic
        }

        pub fn version(&self) -> u32 {
            self.version
        }

        pub fn kind(&self) -> u8 {
            self.kind
        }

        pub fn lp_pda(&self) -> [u8; 32] {
            self.lp_pda
        }

        pub fn engine_slab(&self) -> [u8; 32] {
            self.engine_slab
        }
    }

}

// 7. mod engine_view - read-only signals from the engine slab
pub mod engine_view {
    use crate::constants::*;
    use crate::error::MatcherError;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct SlabHeader {
        pub magic: u64,
        pub version: u32,
        pub bump: u8,
        pub _padding: [u8; 3],
        pub admin: [u8; 32],
        pub pending_admin: [u8; 32],
        pub _reserved: [u8; 24],
    }

    const _: [(); 104] = [(); ENGINE_HEADER_LEN];

    /// Leading fields of the engine's `RiskEngine`, up to and including
    /// `total_open_interest`. Engine `U128`/`I128` are `[u64; 2]` words
    /// (lo, hi), so every field here is 8-aligned and the struct has no
    /// implicit padding.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct EngineHead {
        pub vault: [u64; 2],
        pub insurance_balance: [u64; 2],
        pub insurance_fee_revenue: [u64; 2],
        /// RiskParams: 5 x u64, 3 x U128, u64, u64, U128, u64, U128
        pub params: [u64; 18],
        pub current_slot: u64,
        pub funding_index_qpb_e6: [u64; 2],
        pub last_funding_slot: u64,
        pub loss_accum: [u64; 2],
        pub risk_reduction_only: u8,
        pub _pad0: [u8; 7],
        pub risk_reduction_mode_withdrawn: [u64; 2],
        pub warmup_paused: u8,
        pub _pad1: [u8; 7],
        pub warmup_pause_slot: u64,
        pub last_crank_slot: u64,
        pub max_crank_staleness_slots: u64,
        pub total_open_interest: [u64; 2],
    }

    const _: [(); 312] = [(); core::mem::size_of::<EngineHead>()];

    #[inline]
    pub fn u128_from_words(w: [u64; 2]) -> u128 {
        (w[0] as u128) | ((w[1] as u128) << 64)
    }

    /// Health signals the refresher snapshots.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EngineSignals {
        pub insurance_balance: u128,
        pub total_open_interest: u128,
        pub admin_renounced: bool,
    }

    pub fn read_header(data: &[u8]) -> Result<SlabHeader, MatcherError> {
        let bytes = data
            .get(..ENGINE_HEADER_LEN)
            .ok_or(MatcherError::InvalidEngineSlab)?;
        let header: SlabHeader = bytemuck::pod_read_unaligned(bytes);
        if header.magic != ENGINE_MAGIC {
            return Err(MatcherError::InvalidEngineSlab);
        }
        Ok(header)
    }

    pub fn read_signals(data: &[u8]) -> Result<EngineSignals, MatcherError> {
        let header = read_header(data)?;
        let bytes = data
            .get(ENGINE_OFF..ENGINE_MIN_LEN)
            .ok_or(MatcherError::InvalidEngineSlab)?;
        let engine: EngineHead = bytemuck::pod_read_unaligned(bytes);
        Ok(EngineSignals {
            insurance_balance: u128_from_words(engine.insurance_balance),
            total_open_interest: u128_from_words(engine.total_open_interest),
            admin_renounced: crate::verify::admin_renounced(header.admin, header.pending_admin),
        })
    }
}

// 8. mod pricing - pure quote computation
pub mod pricing {
    use crate::constants::BPS_DENOM;
    use crate::error::MatcherError;
    use crate::state::{LiveState, MatcherParams};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Quote {
        /// Oracle price when the fill is zero
        pub exec_price_e6: u64,
        /// Signed like the request; 0 = not executed
        pub exec_size: i128,
        pub spread_bps: u64,
        pub total_bps: u64,
    }

    /// `imbalance_k_bps * |inventory| / liquidity_notional_e6`, floored.
    pub fn imbalance_cost_bps(
        imbalance_k_bps: u32,
        inventory: i128,
        liquidity_notional_e6: u128,
    ) -> Result<u128, MatcherError> {
        if liquidity_notional_e6 == 0 {
            return Err(MatcherError::InvalidParams);
        }
        let scaled = (imbalance_k_bps as u128)
            .checked_mul(inventory.unsigned_abs())
            .ok_or(MatcherError::ArithmeticOverflow)?;
        Ok(scaled / liquidity_notional_e6)
    }

    /// `insurance_weight_bps * min(insurance / total_oi, 1)`, floored.
    /// Zero when there is no open interest.
    pub fn coverage_discount_bps(insurance_weight_bps: u32, insurance: u128, total_oi: u128) -> u128 {
        let weight = insurance_weight_bps as u128;
        if total_oi == 0 {
            return 0;
        }
        if insurance >= total_oi {
            return weight;
        }
        // Keep weight * insurance inside u128: shift both by an amount that
        // depends on total_oi only, so the result stays monotone in insurance.
        let shift = (128 - total_oi.leading_zeros()).saturating_sub(96);
        let oi = total_oi >> shift;
        let ins = insurance >> shift;
        weight * ins / oi
    }

    /// `min_spread_bps * age / (age + halflife)`, floored.
    pub fn age_discount_bps(min_spread_bps: u32, age_slots: u64, halflife_slots: u64) -> u128 {
        let denom = age_slots as u128 + halflife_slots as u128;
        if denom == 0 {
            return 0;
        }
        (min_spread_bps as u128) * (age_slots as u128) / denom
    }

    /// Effective spread, always within `[1, max_spread_bps]`.
    pub fn spread_bps(params: &MatcherParams, live: &LiveState) -> Result<u64, MatcherError> {
        let imbalance = imbalance_cost_bps(
            params.imbalance_k_bps,
            live.inventory,
            params.liquidity_notional_e6,
        )?;
        let insurance = coverage_discount_bps(
            params.insurance_weight_bps,
            live.insurance_snapshot,
            live.total_oi_snapshot,
        );
        let age = age_discount_bps(
            params.min_spread_bps,
            live.market_age_slots,
            params.age_halflife_slots,
        );

        // Anything past u128::MAX is clamped to the ceiling below anyway.
        let widened = (params.min_spread_bps as u128).saturating_add(imbalance);
        let discount = insurance + age;
        let ceiling = (params.max_spread_bps as u128).max(1);
        let spread = widened.saturating_sub(discount).clamp(1, ceiling);
        Ok(spread as u64)
    }

    /// Room left before |inventory| hits the cap, in the direction the fill
    /// pushes the LP. The LP takes the other side of the user.
    pub fn inventory_headroom(inventory: i128, max_inventory_abs: u128, user_buys: bool) -> u128 {
        let inv_abs = inventory.unsigned_abs();
        // User buy moves LP inventory down, user sell moves it up.
        let unwinding = if user_buys { inventory > 0 } else { inventory < 0 };
        if unwinding {
            max_inventory_abs.saturating_add(inv_abs)
        } else {
            max_inventory_abs.saturating_sub(inv_abs)
        }
    }

    /// Unsigned fill: `min(|req|, max_fill_abs, headroom)`.
    pub fn fill_abs(params: &MatcherParams, inventory: i128, req_size: i128) -> u128 {
        if req_size == 0 {
            return 0;
        }
        let headroom = inventory_headroom(inventory, params.max_inventory_abs, req_size > 0);
        req_size
            .unsigned_abs()
            .min(params.max_fill_abs)
            .min(headroom)
    }

    /// Buy pays above oracle (rounded up), sell receives below (rounded down).
    pub fn exec_price_e6(oracle_price_e6: u64, total_bps: u64, user_buys: bool) -> Result<u64, MatcherError> {
        let oracle = oracle_price_e6 as u128;
        let total = total_bps as u128;
        let price = if user_buys {
            let numer = oracle
                .checked_mul(BPS_DENOM + total)
                .ok_or(MatcherError::ArithmeticOverflow)?;
            numer.div_ceil(BPS_DENOM)
        } else {
            let factor = BPS_DENOM
                .checked_sub(total)
                .ok_or(MatcherError::ExecPriceOutOfRange)?;
            oracle
                .checked_mul(factor)
                .ok_or(MatcherError::ArithmeticOverflow)?
                / BPS_DENOM
        };
        if price == 0 || price > u64::MAX as u128 {
            return Err(MatcherError::ExecPriceOutOfRange);
        }
        Ok(price as u64)
    }

    pub fn quote(
        params: &MatcherParams,
        live: &LiveState,
        oracle_price_e6: u64,
        req_size: i128,
    ) -> Result<Quote, MatcherError> {
        if oracle_price_e6 == 0 {
            return Err(MatcherError::InvalidOraclePrice);
        }
        if req_size == i128::MIN {
            return Err(MatcherError::InvalidRequestSize);
        }

        let spread = spread_bps(params, live)?;
        let total_bps = spread + params.base_fee_bps as u64;
        let fill = fill_abs(params, live.inventory, req_size);

        if fill == 0 {
            return Ok(Quote {
                exec_price_e6: oracle_price_e6,
                exec_size: 0,
                spread_bps: spread,
                total_bps,
            });
        }

        let user_buys = req_size > 0;
        let exec_price = exec_price_e6(oracle_price_e6, total_bps, user_buys)?;
        // fill <= |req_size| <= i128::MAX
        let exec_size = if user_buys { fill as i128 } else { -(fill as i128) };

        Ok(Quote {
            exec_price_e6: exec_price,
            exec_size,
            spread_bps: spread,
            total_bps,
        })
    }

    /// Live state after a quote executes. Unchanged on a zero fill.
    pub fn apply_fill(live: &LiveState, quote: &Quote, oracle_price_e6: u64) -> Result<LiveState, MatcherError> {
        if quote.exec_size == 0 {
            return Ok(*live);
        }
        let inventory = live
            .inventory
            .checked_sub(quote.exec_size)
            .ok_or(MatcherError::ArithmeticOverflow)?;
        Ok(LiveState {
            inventory,
            last_oracle_price_e6: oracle_price_e6,
            last_exec_price_e6: quote.exec_price_e6,
            ..*live
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn params() -> MatcherParams {
            MatcherParams {
                base_fee_bps: 0,
                min_spread_bps: 10,
                max_spread_bps: 100,
                imbalance_k_bps: 0,
                liquidity_notional_e6: 1_000_000,
                max_fill_abs: 1_000_000,
                max_inventory_abs: 1_000,
                age_halflife_slots: 1_000,
                insurance_weight_bps: 5,
            }
        }

        #[test]
        fn test_full_credibility_hits_floor() {
            let live = LiveState {
                market_age_slots: 1_000,
                insurance_snapshot: 777,
                total_oi_snapshot: 777,
                ..LiveState::default()
            };
            assert_eq!(coverage_discount_bps(5, 777, 777), 5);
            assert_eq!(age_discount_bps(10, 1_000, 1_000), 5);
            assert_eq!(spread_bps(&params(), &live).unwrap(), 1);
        }

        #[test]
        fn test_fresh_market_pays_min_spread() {
            let live = LiveState::default();
            assert_eq!(spread_bps(&params(), &live).unwrap(), 10);
        }

        #[test]
        fn test_age_discount_half_at_halflife_rounds_down() {
            assert_eq!(age_discount_bps(11, 500, 500), 5);
            assert_eq!(age_discount_bps(10, 0, 0), 0);
            assert_eq!(age_discount_bps(10, u64::MAX, 0), 10);
        }

        #[test]
        fn test_coverage_zero_oi_is_no_discount() {
            assert_eq!(coverage_discount_bps(50, 1_000, 0), 0);
            assert_eq!(coverage_discount_bps(50, 0, 1_000), 0);
            assert_eq!(coverage_discount_bps(50, 500, 1_000), 25);
            assert_eq!(coverage_discount_bps(50, u128::MAX, 1_000), 50);
        }

        #[test]
        fn test_coverage_huge_values_do_not_overflow() {
            let oi = u128::MAX;
            assert_eq!(coverage_discount_bps(9_000, oi / 2, oi), 4_499);
            assert_eq!(coverage_discount_bps(9_000, oi - (1u128 << 40), oi), 8_999);
        }

        #[test]
        fn test_imbalance_widens_and_caps_at_max() {
            let mut p = params();
            p.imbalance_k_bps = 1_000;
            p.liquidity_notional_e6 = 1_000;
            let live = LiveState {
                inventory: -50,
                ..LiveState::default()
            };
            // 10 + 1000 * 50 / 1000 = 60
            assert_eq!(spread_bps(&p, &live).unwrap(), 60);

            let live = LiveState {
                inventory: 1_000,
                ..LiveState::default()
            };
            assert_eq!(spread_bps(&p, &live).unwrap(), 100);
        }

        #[test]
        fn test_pathological_imbalance_still_clamped() {
            let mut p = params();
            p.imbalance_k_bps = 2;
            p.liquidity_notional_e6 = 1;
            p.max_inventory_abs = i128::MAX as u128;
            let live = LiveState {
                inventory: -i128::MAX,
                ..LiveState::default()
            };
            assert_eq!(spread_bps(&p, &live).unwrap(), 100);

            p.imbalance_k_bps = 3;
            assert_eq!(
                spread_bps(&p, &live),
                Err(MatcherError::ArithmeticOverflow)
            );
        }

        #[test]
        fn test_buy_rounds_up_sell_rounds_down() {
            assert_eq!(exec_price_e6(100_001, 50, true).unwrap(), 100_502);
            assert_eq!(exec_price_e6(100_001, 50, false).unwrap(), 99_500);
            assert_eq!(
                exec_price_e6(1, 10, false),
                Err(MatcherError::ExecPriceOutOfRange)
            );
        }

        #[test]
        fn test_fill_truncated_to_headroom() {
            let p = params();
            // LP short 900, user buys 500: LP may only sell 100 more
            assert_eq!(fill_abs(&p, -900, 500), 100);
            // LP long 900, user buys: unwinds through zero up to -1000
            assert_eq!(fill_abs(&p, 900, 5_000), 1_900);
            // Saturated in the pushed direction
            assert_eq!(fill_abs(&p, -1_000, 1), 0);
            assert_eq!(fill_abs(&p, 1_000, -1), 0);
            assert_eq!(fill_abs(&p, 0, 0), 0);
        }

        #[test]
        fn test_quote_zero_fill_echoes_oracle() {
            let p = params();
            let live = LiveState {
                inventory: -1_000,
                ..LiveState::default()
            };
            let q = quote(&p, &live, 100_000_000, 10).unwrap();
            assert_eq!(q.exec_size, 0);
            assert_eq!(q.exec_price_e6, 100_000_000);
            assert_eq!(apply_fill(&live, &q, 100_000_000).unwrap(), live);
        }

        #[test]
        fn test_sell_fill_moves_inventory_up() {
            let p = params();
            let live = LiveState::default();
            let q = quote(&p, &live, 100_000_000, -250).unwrap();
            assert_eq!(q.exec_size, -250);
            assert_eq!(q.exec_price_e6, 99_900_000);
            let next = apply_fill(&live, &q, 100_000_000).unwrap();
            assert_eq!(next.inventory, 250);
            assert_eq!(next.last_exec_price_e6, 99_900_000);
            assert_eq!(next.last_oracle_price_e6, 100_000_000);
        }

        #[test]
        fn test_quote_rejects_bad_inputs() {
            let p = params();
            let live = LiveState::default();
            assert_eq!(
                quote(&p, &live, 0, 1),
                Err(MatcherError::InvalidOraclePrice)
            );
            assert_eq!(
                quote(&p, &live, 1_000_000, i128::MIN),
                Err(MatcherError::InvalidRequestSize)
            );
        }
    }
}

// 9. mod credibility - snapshot refresh
pub mod credibility {
    use crate::engine_view::EngineSignals;
    use crate::state::LiveState;

    /// Fold fresh engine signals into the live state.
    ///
    /// Snapshots and `snapshot_slot` are overwritten every time. Age accrues
    /// by the slots since the previous refresh, and only when both that
    /// refresh and this one saw the engine's admin renounced. Any other
    /// refresh only moves the baseline.
    pub fn refresh(live: &LiveState, signals: &EngineSignals, current_slot: u64) -> LiveState {
        let has_baseline = live.snapshot_slot != 0;
        let renounced_throughout =
            has_baseline && live.admin_renounced_at_snapshot && signals.admin_renounced;

        let market_age_slots = if renounced_throughout {
            live.market_age_slots
                .saturating_add(current_slot.saturating_sub(live.snapshot_slot))
        } else {
            live.market_age_slots
        };

        let last_deficit_slot =
            if has_baseline && signals.insurance_balance < live.insurance_snapshot {
                current_slot
            } else {
                live.last_deficit_slot
            };

        LiveState {
            insurance_snapshot: signals.insurance_balance,
            total_oi_snapshot: signals.total_open_interest,
            market_age_slots,
            last_deficit_slot,
            snapshot_slot: current_slot,
            admin_renounced_at_snapshot: signals.admin_renounced,
            ..*live
        }
    }

    /// Slots since the last refresh, for monitoring.
    pub fn staleness_slots(live: &LiveState, current_slot: u64) -> u64 {
        current_slot.saturating_sub(live.snapshot_slot)
    }

}

// 10. mod processor
pub mod processor {
    use crate::{
        accounts,
        constants::MATCHER_ABI_VERSION,
        credibility,
        engine_view,
        error::MatcherError,
        ix::Instruction,
        matcher_abi::{MatcherCall, MatcherReturn},
        pricing,
        state::{self, MatcherContext, MatcherParams},
        tags::TAG_MATCH,
    };
    #[allow(unused_imports)]
    use alloc::format;
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        log::sol_log_64,
        msg,
        pubkey::Pubkey,
        sysvar::{self, clock::Clock, Sysvar},
    };

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        match Instruction::decode(instruction_data)? {
            Instruction::Match(call) => process_match(program_id, accounts, &call),
            Instruction::Init { params } => process_init(program_id, accounts, &params),
            Instruction::UpdateCredibility => process_update_credibility(program_id, accounts),
        }
    }

    fn process_init(program_id: &Pubkey, accounts: &[AccountInfo], params: &MatcherParams) -> ProgramResult {
        accounts::expect_len(accounts, 3)?;
        let a_lp_pda = &accounts[0];
        let a_ctx = &accounts[1];
        let a_slab = &accounts[2];

        accounts::expect_writable(a_ctx)?;
        accounts::expect_matcher_ctx(program_id, a_ctx)?;

        params.validate()?;
        if a_lp_pda.key.to_bytes() == [0u8; 32] {
            return Err(MatcherError::InvalidParams.into());
        }
        {
            let slab_data = a_slab.try_borrow_data()?;
            engine_view::read_header(&slab_data)?;
        }

        let mut data = a_ctx.try_borrow_mut_data()?;
        let region = state::ctx_region_mut(&mut data)?;
        if MatcherContext::is_initialized(region) {
            return Err(MatcherError::AlreadyInitialized.into());
        }

        let ctx = MatcherContext::new(a_lp_pda.key, a_slab.key, *params);
        ctx.write_to(region)?;

        msg!(
            "credibility matcher init: lp_pda={} slab={} spread={}..{} fee={}",
            a_lp_pda.key,
            a_slab.key,
            params.min_spread_bps,
            params.max_spread_bps,
            params.base_fee_bps
        );
        Ok(())
    }

    fn process_match(program_id: &Pubkey, accounts: &[AccountInfo], call: &MatcherCall) -> ProgramResult {
        accounts::expect_len(accounts, 2)?;
        let a_lp_pda = &accounts[0];
        let a_ctx = &accounts[1];

        accounts::expect_signer(a_lp_pda)?;
        accounts::expect_writable(a_ctx)?;
        accounts::expect_matcher_ctx(program_id, a_ctx)?;

        // Single borrow: read, price, write back context and return together.
        let mut data = a_ctx.try_borrow_mut_data()?;
        let ctx = MatcherContext::read_from(state::ctx_region(&data[..])?)?;

        if !crate::verify::lp_pda_ok(ctx.lp_pda(), a_lp_pda.key.to_bytes()) {
            return Err(MatcherError::LpPdaMismatch.into());
        }

        #[cfg(feature = "cu-audit")]
        {
            msg!("CU_CHECKPOINT: match_pricing_start");
            solana_program::log::sol_log_compute_units();
        }

        let quote = pricing::quote(ctx.params(), &ctx.live, call.oracle_price_e6, call.req_size)?;
        let live = pricing::apply_fill(&ctx.live, &quote, call.oracle_price_e6)?;

        #[cfg(feature = "cu-audit")]
        {
            msg!("CU_CHECKPOINT: match_pricing_end");
            solana_program::log::sol_log_compute_units();
        }

        let ret = MatcherReturn {
            abi_version: MATCHER_ABI_VERSION,
            flags: crate::verify::flags_for_fill(
                quote.exec_size.unsigned_abs(),
                call.req_size.unsigned_abs(),
            ),
            exec_price_e6: quote.exec_price_e6,
            exec_size: quote.exec_size,
            req_id: call.req_id,
            lp_account_id: call.lp_account_id,
            oracle_price_e6: call.oracle_price_e6,
            reserved: 0,
        };

        live.write_to(state::ctx_region_mut(&mut data)?)?;
        ret.write_to(&mut data)?;

        sol_log_64(
            TAG_MATCH as u64,
            quote.exec_price_e6,
            // Sign-extended so sells read as negative
            quote.exec_size as i64 as u64,
            quote.spread_bps,
            quote.total_bps,
        );
        Ok(())
    }

    fn process_update_credibility(program_id: &Pubkey, accounts: &[AccountInfo]) -> ProgramResult {
        accounts::expect_len(accounts, 3)?;
        let a_ctx = &accounts[0];
        let a_slab = &accounts[1];
        let a_clock = &accounts[2];

        accounts::expect_writable(a_ctx)?;
        accounts::expect_matcher_ctx(program_id, a_ctx)?;
        accounts::expect_key(a_clock, &sysvar::clock::ID)?;
        let clock = Clock::from_account_info(a_clock)?;

        let signals = {
            let slab_data = a_slab.try_borrow_data()?;
            engine_view::read_signals(&slab_data)?
        };

        let mut data = a_ctx.try_borrow_mut_data()?;
        let ctx = MatcherContext::read_from(state::ctx_region(&data[..])?)?;
        if !crate::verify::engine_slab_ok(ctx.engine_slab(), a_slab.key.to_bytes()) {
            return Err(MatcherError::EngineSlabMismatch.into());
        }

        let live = credibility::refresh(&ctx.live, &signals, clock.slot);
        live.write_to(state::ctx_region_mut(&mut data)?)?;

        msg!(
            "credibility refresh: slot={} age={} insurance={} oi={} renounced={}",
            clock.slot,
            live.market_age_slots,
            live.insurance_snapshot,
            live.total_oi_snapshot,
            signals.admin_renounced
        );
        Ok(())
    }
}

// 11. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint {
    use crate::processor;
    #[allow(unused_imports)]
    use alloc::format; // Required by entrypoint! macro in SBF builds
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult, pubkey::Pubkey,
    };

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        processor::process_instruction(program_id, accounts, instruction_data)
    }
}
