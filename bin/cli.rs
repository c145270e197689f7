use odra::casper_types::U256;
use odra::host::HostEnv;
use odra::prelude::Addressable;

use odra_cli::{
    deploy::DeployScript,
    scenario::{Args, Error, Scenario, ScenarioMetadata},
    CommandArg, ContractProvider, DeployedContractsContainer, DeployerExt, OdraCli,
};

use peerlend::processor::{PeerLendingLedger, PeerLendingLedgerInitArgs};
use peerlend::state::{PositionKey, ProtocolConfig, RollingConfig};

const DAY_MS: u64 = 86_400_000;

fn initial_config() -> ProtocolConfig {
    ProtocolConfig {
        platform_fee_bps: 1_000,
        lender_interest_share_bps: 8_000,
        platform_fee_lender_split_bps: 5_000,
        default_lender_split_bps: 7_000,
        active_credit_share_bps: 2_000,
        min_interest_duration: DAY_MS,
        grace_period: 3 * DAY_MS,
        active_credit_time_gate: 7 * DAY_MS,
        max_ltv_bps: 8_000,
        min_deposit: U256::from(1_000u64),
        min_loan: U256::from(1_000u64),
    }
}

fn initial_rolling_config() -> RollingConfig {
    RollingConfig {
        min_payment_interval: 7 * DAY_MS,
        max_payment_count: 52,
        max_upfront_premium_bps: 1_000,
        min_rolling_apy_bps: 0,
        max_rolling_apy_bps: 50_000,
        default_penalty_bps: 1_000,
        min_payment_bps: 100,
    }
}

pub struct LedgerDeployScript;

impl DeployScript for LedgerDeployScript {
    fn deploy(
        &self,
        env: &HostEnv,
        container: &mut DeployedContractsContainer,
    ) -> Result<(), odra_cli::deploy::Error> {
        let deployer = env.caller();
        let args = PeerLendingLedgerInitArgs {
            // the deployer doubles as owner and registry until the real ones
            // are wired
            owner: deployer,
            position_registry: deployer,
            treasury: PositionKey {
                token_contract: deployer,
                token_id: 0,
            },
            config: initial_config(),
            rolling_config: initial_rolling_config(),
        };
        let ledger =
            PeerLendingLedger::load_or_deploy(env, args, container, 300_000_000_000)?;
        println!("ledger deployed at {:?}", ledger.address());
        Ok(())
    }
}

pub struct ShowConfigScenario;

impl Scenario for ShowConfigScenario {
    fn args(&self) -> Vec<CommandArg> {
        vec![]
    }

    fn run(
        &self,
        env: &HostEnv,
        container: &DeployedContractsContainer,
        _args: Args,
    ) -> Result<(), Error> {
        let ledger = container.contract_ref::<PeerLendingLedger>(env)?;
        println!("protocol config: {:?}", ledger.get_config());
        println!("rolling config: {:?}", ledger.get_rolling_config());
        Ok(())
    }
}

impl ScenarioMetadata for ShowConfigScenario {
    const NAME: &'static str = "show-config";
    const DESCRIPTION: &'static str = "Prints the ledger's protocol and rolling-loan configuration";
}

pub fn main() {
    OdraCli::new()
        .about("CLI tool for the peer lending ledger")
        .deploy(LedgerDeployScript)
        .contract::<PeerLendingLedger>()
        .scenario(ShowConfigScenario)
        .build()
        .run();
}
