//! Consensus parameter definitions.

use crate::checkpoints::CheckpointData;
use crate::constants::COINBASE_MATURITY;
use crate::money::{Amount, COIN};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    /// Hash of the only block allowed without a parent. `None` accepts the
    /// first parentless block submitted and pins it from then on.
    pub hash_genesis_block: Option<Hash256>,
    pub pow_limit: Hash256,
    pub pow_target_spacing: i64,
    pub pow_target_timespan: i64,
    pub pow_no_retargeting: bool,
    pub subsidy_halving_interval: i32,
    pub initial_subsidy: Amount,
    pub coinbase_maturity: i32,
    pub checkpoints: Vec<Checkpoint>,
    pub checkpoint_data: CheckpointData,
}

impl ConsensusParams {
    /// Number of blocks between two difficulty adjustments.
    pub fn retarget_interval(&self) -> i64 {
        self.pow_target_timespan / self.pow_target_spacing
    }

    pub fn min_actual_timespan(&self) -> i64 {
        self.pow_target_timespan / 4
    }

    pub fn max_actual_timespan(&self) -> i64 {
        self.pow_target_timespan * 4
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hash hex must be 1..=64 digits"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a big-endian display hex string into little-endian hash bytes.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }

    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let padded = format!("{hex:0>64}");
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out = u8::from_str_radix(&padded[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();

    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: i32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    /// Magic prefix of each record in imported block files.
    pub message_start: [u8; 4],
    pub default_data_dir: &'static str,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_chain_params(),
        Network::Testnet => testnet_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        hash_genesis_block: None,
        pow_limit: hash256_from_hex(
            "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("mainnet pow limit"),
        pow_target_spacing: 150,
        pow_target_timespan: 302_400,
        pow_no_retargeting: false,
        subsidy_halving_interval: 840_000,
        initial_subsidy: 50 * COIN,
        coinbase_maturity: COINBASE_MATURITY,
        checkpoints: mainnet_checkpoints(),
        checkpoint_data: CheckpointData {
            time_last_checkpoint: 1_396_740_989,
            transactions_last_checkpoint: 581_048,
            transactions_per_day: 8_000.0,
        },
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        hash_genesis_block: Some(
            hash256_from_hex("b78197f0e175697646db1f738edc1ffdcb30588ebe70e7e16026489076577061")
                .expect("testnet genesis"),
        ),
        pow_limit: hash256_from_hex(
            "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("testnet pow limit"),
        pow_target_spacing: 150,
        pow_target_timespan: 302_400,
        pow_no_retargeting: false,
        subsidy_halving_interval: 840_000,
        initial_subsidy: 50 * COIN,
        coinbase_maturity: COINBASE_MATURITY,
        // Testnet is pinned only by its genesis hash.
        checkpoints: Vec::new(),
        checkpoint_data: CheckpointData {
            time_last_checkpoint: 1_369_685_559,
            transactions_last_checkpoint: 37_581,
            transactions_per_day: 300.0,
        },
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        hash_genesis_block: None,
        pow_limit: hash256_from_hex(
            "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("regtest pow limit"),
        pow_target_spacing: 150,
        pow_target_timespan: 302_400,
        pow_no_retargeting: true,
        subsidy_halving_interval: 150,
        initial_subsidy: 50 * COIN,
        coinbase_maturity: COINBASE_MATURITY,
        checkpoints: Vec::new(),
        checkpoint_data: CheckpointData {
            time_last_checkpoint: 0,
            transactions_last_checkpoint: 0,
            transactions_per_day: 0.0,
        },
    }
}

fn parse_checkpoints(entries: &[(i32, &str)]) -> Vec<Checkpoint> {
    entries
        .iter()
        .map(|(height, hash)| Checkpoint {
            height: *height,
            hash: hash256_from_hex(hash).expect("checkpoint hash"),
        })
        .collect()
}

fn mainnet_checkpoints() -> Vec<Checkpoint> {
    parse_checkpoints(&[
        (10, "b7d642e9658e13a912685dd5c252da389db91c96e7daffbcae1c630e0243c31a"),
        (16_755, "7a2d2354ffd776da35061ec983d0e38ffb01cb87a1e0e35ecb1b644f62dc4379"),
        (17_542, "aa30d8b18eb39522e4f80bcf562abeef9a0db08b6855ebb70d96a9ab396dd8f3"),
        (18_338, "96fe9464024e09ebe95261f96ff01bfdc01553f7a800fb3656a34da4dfffbd6c"),
        (18_818, "8057cf460b2b6b375148e4ac9e6c8b0193775d78079e7b2037f6e8d44185afc5"),
        (18_819, "62e129b02411ae495ba43daa4dd8e87b912175ac5c23745e265f6c774d24b905"),
        (18_900, "107034123b366f5de7642f75fb84d54c830da86b7c0f531dd843361e31d6fc7b"),
        (18_980, "da3e72700b01f0c6ae111ba9fb43e0b5f8c2fe473db3a5a4a5ba9c12c8f37046"),
        (20_000, "f7101c175b6a838917ae31d266525c9f6035f7979cedfdd98b99f92fd360cf7c"),
        (21_000, "36d632e2080eebc62b73b758623ce0698c104ab7f2a3a90a51d5bcf107e55377"),
        (22_000, "05c9cc15a4c817d4e5b1c31ea783f83a216008a82813ee859796c26870c235c8"),
        (23_000, "827503a75f90d30cce62e8dfc1b2eb28a88582d1c7f3ebba3d1cf64c944bd83b"),
        (25_000, "84436f98b9f13084aea974f1a225539475c320cddfaf29703543b893ce09f216"),
        (28_000, "3ecfd94e223d7ccd6629704fa8fa18cac68a159e82498c62804666dcbbc3c987"),
        (31_000, "9c415cc8067ec8261bc5efd3b9f7a83502ee579414ac3250fbaf17a653ab134e"),
        (35_000, "6bcc8911e1029971130a61f3ca81f8817eb96e1dcd0d70f28ae1e4bf78841a5a"),
        (40_000, "c7998d00fd7ffbca6c420c432af7d98d283a477cf2c1d5c937b560c136ad6b07"),
        (45_000, "d309fe76b0f7309d242126b12fa58d1db2b364ccba89f134dfd4a16983c8ba00"),
        (50_000, "daf0a1c441241cc3aa2f64f59399e2a8fd0e6d1d2bdfed66c49fcdca4b8f4931"),
        (60_000, "1c7b7199033b0b8a29f27f857b5c7976007d68f0cfd821f94c62fcdee156497d"),
        (70_000, "b21d73697594d274fd462badc913ad2c3346b7ddba6a38c088b96a02d3f293e7"),
        (73_000, "41c8b855cf26b1d7d1ae0c509655a012cb106d1d167ac8ddf60d2dca5956cd69"),
        (76_000, "e8204ebe42333ef3b11499bf4d35424d5b7d62ccf5d6052bff6c87bc573fa543"),
        (78_000, "06f3540e284ac1ab39c06092e4684ded30e4a8a4357e3105262d67640de81357"),
        (80_328, "203f3a0a2cea095261d3fb916b5bd7f0b4e35b686d2a857b56d41dbb1fedcd6e"),
        (85_000, "4da76b1992f3b56a9b7a2201ae471d61f48ebbfe3d6ad995d52caedd1db6554a"),
        (90_000, "5cf30f47a845b1c829c481c4c77fc95e9963f91af4f02a9ebbff3f3ca00f7cb1"),
        (92_398, "7ec135732f8b6df18b78415f6a619ec2ecb0c5890a8c9cdf5e76dd82717e8f2c"),
        (94_618, "9c38f4696c58a5e1a36871ac8795ad7296e734ae2f01ab75298c8b6dca71ccfa"),
    ])
}

fn mainnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Mainnet,
        consensus: mainnet_consensus_params(),
        message_start: [0xfb, 0xc0, 0xb6, 0xdb],
        default_data_dir: "data",
    }
}

fn testnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Testnet,
        consensus: testnet_consensus_params(),
        message_start: [0xfc, 0xc1, 0xb7, 0xdc],
        default_data_dir: "data-testnet",
    }
}

fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        consensus: regtest_consensus_params(),
        message_start: [0xfa, 0xbf, 0xb5, 0xda],
        default_data_dir: "data-regtest",
    }
}
