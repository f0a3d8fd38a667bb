/// SCRIPTED PROTOCOL SESSION
///
/// Drives a full session against an in-memory bank: one broker service,
/// a staked validator panel and a list of scripted processes. Validators run
/// as independent tasks that only react to request events addressed to them,
/// the same way external validator agents would. The driver plays customer
/// and broker.

use anyhow::{bail, Context, Result};
use arbitra_consensus::{StaticEntropy, ValidatorSelector};
use arbitra_core::{
    keccak256, Address, Amount, Currency, EventRecord, FeeShares, ProcessId, ProcessKey,
    ProtocolConfig, ProtocolError, ProtocolEvent,
};
use arbitra_economics::{AssetBank, InMemoryBank};
use arbitra_protocol::{Protocol, SharedProtocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const STAKE_TOKEN_LABEL: &str = "arbitra.stake-token";
const DEPOSIT_TOKEN_LABEL: &str = "arbitra.deposit-token";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    #[default]
    Native,
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorScript {
    pub name: String,
    pub stake: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceScript {
    pub broker: String,
    pub validators: Vec<ValidatorScript>,
    /// Falls back to the protocol default shares
    pub shares: Option<FeeShares>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessScript {
    pub id: String,
    pub customer: String,
    #[serde(default)]
    pub rail: Rail,
    #[serde(default)]
    pub data: String,
    pub deposit_to: String,
    /// Quote submitted in round N is entry N-1 (the last entry repeats)
    pub cost_quotes: Vec<Amount>,
    #[serde(default)]
    pub actions: Vec<String>,
    /// Vote submitted in round N is entry N-1 (the last entry repeats)
    #[serde(default = "default_votes")]
    pub termination_votes: Vec<bool>,
}

fn default_votes() -> Vec<bool> {
    vec![true]
}

fn scripted<T: Copy>(values: &[T], round: u32, fallback: T) -> T {
    let index = (round.max(1) - 1) as usize;
    values
        .get(index)
        .or_else(|| values.last())
        .copied()
        .unwrap_or(fallback)
}

impl ProcessScript {
    pub fn quote(&self, round: u32) -> Amount {
        scripted(&self.cost_quotes, round, 0)
    }

    pub fn vote(&self, round: u32) -> bool {
        scripted(&self.termination_votes, round, true)
    }

    pub fn key(&self) -> ProcessKey {
        ProcessKey::new(Address::from_label(&self.customer), ProcessId::from_label(&self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub protocol: ProtocolConfig,
    pub admin: String,
    /// Replayable selection when set; chain entropy otherwise
    pub entropy_key: Option<String>,
    pub service: ServiceScript,
    /// Native and deposit-token balance minted to every customer
    pub customer_funding: Amount,
    /// Blocks mined between the steps of a process
    pub blocks_per_step: u64,
    pub processes: Vec<ProcessScript>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            protocol: ProtocolConfig::default(),
            admin: "admin".to_string(),
            entropy_key: None,
            service: ServiceScript::default(),
            customer_funding: 1_000_000_000_000,
            blocks_per_step: 1,
            processes: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SimulationConfig =
            serde_yaml::from_str(yaml).context("Failed to parse simulation config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        if self.service.validators.is_empty() {
            bail!("service '{}' has no validators", self.service.broker);
        }
        for process in &self.processes {
            if process.cost_quotes.is_empty() {
                bail!("process '{}' has no cost quotes", process.id);
            }
            if process.termination_votes.is_empty() {
                bail!("process '{}' has no termination votes", process.id);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub id: String,
    pub customer: String,
    pub state: String,
    pub cost: Amount,
    pub verdict: Option<bool>,
    pub retained_fee: Amount,
    pub dissenters: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StakeReport {
    pub validator: String,
    pub amount: Amount,
    pub total_slashed: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub processes: Vec<ProcessReport>,
    pub stakes: Vec<StakeReport>,
    pub total_staked: Amount,
    pub treasury_native: Amount,
    pub treasury_stake_token: Amount,
    pub treasury_deposit_token: Amount,
    pub events: Vec<EventRecord>,
}

struct AgentFailure {
    key: ProcessKey,
    error: ProtocolError,
}

/// Human-readable names for every scripted actor.
struct Names(BTreeMap<Address, String>);

impl Names {
    fn name(&self, who: &Address) -> String {
        self.0.get(who).cloned().unwrap_or_else(|| who.to_string())
    }
}

pub struct Simulation {
    config: SimulationConfig,
    shared: SharedProtocol<InMemoryBank>,
    names: Names,
    admin: Address,
    broker: Address,
    deposit_token: Address,
}

impl Simulation {
    /// Deploy the protocol, register the service and stake the panel.
    pub fn setup(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let admin = Address::from_label(&config.admin);
        let broker = Address::from_label(&config.service.broker);
        let stake_token = Address::from_label(STAKE_TOKEN_LABEL);
        let deposit_token = Address::from_label(DEPOSIT_TOKEN_LABEL);

        let mut names = BTreeMap::new();
        names.insert(admin, config.admin.clone());
        names.insert(broker, config.service.broker.clone());

        let mut bank = InMemoryBank::new();
        bank.register_token(stake_token, "STK");
        bank.register_token(deposit_token, "DEP");
        for process in &config.processes {
            let customer = Address::from_label(&process.customer);
            if names.insert(customer, process.customer.clone()).is_none() {
                bank.mint_native(&customer, config.customer_funding);
                bank.mint(&deposit_token, &customer, config.customer_funding)?;
            }
            names.insert(Address::from_label(&process.deposit_to), process.deposit_to.clone());
        }

        let mut protocol = Protocol::new(config.protocol.clone(), admin, stake_token, bank)?;
        if let Some(key) = &config.entropy_key {
            protocol = protocol.with_selector(ValidatorSelector::new(Arc::new(StaticEntropy::new(
                keccak256(key.as_bytes()),
            ))));
        }
        let custody = protocol.custody();

        let validators: Vec<Address> = config
            .service
            .validators
            .iter()
            .map(|v| Address::from_label(&v.name))
            .collect();
        let shares = config
            .service
            .shares
            .unwrap_or(config.protocol.default_shares);
        protocol.add_service_with_shares(&admin, broker, validators.clone(), shares)?;

        for (script, validator) in config.service.validators.iter().zip(&validators) {
            names.insert(*validator, script.name.clone());
            if script.stake == 0 {
                continue;
            }
            let bank = protocol.bank_mut();
            bank.mint(&stake_token, validator, script.stake)?;
            bank.approve(&stake_token, validator, &custody, script.stake)?;
            protocol.stake(validator, &broker, script.stake)?;
        }

        info!(
            "Simulation ready: {} validators, {} processes",
            validators.len(),
            config.processes.len()
        );
        Ok(Simulation {
            config,
            shared: SharedProtocol::new(protocol),
            names: Names(names),
            admin,
            broker,
            deposit_token,
        })
    }

    pub fn protocol(&self) -> &SharedProtocol<InMemoryBank> {
        &self.shared
    }

    /// Run every scripted process to completion or failure.
    pub async fn run(self) -> Result<SimulationReport> {
        let scripts: Arc<BTreeMap<ProcessKey, ProcessScript>> = Arc::new(
            self.config
                .processes
                .iter()
                .map(|p| (p.key(), p.clone()))
                .collect(),
        );
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        let mut events = self.shared.subscribe();

        let agents: Vec<JoinHandle<()>> = self
            .config
            .service
            .validators
            .iter()
            .map(|v| {
                spawn_agent(
                    self.shared.clone(),
                    Address::from_label(&v.name),
                    Arc::clone(&scripts),
                    failures_tx.clone(),
                )
            })
            .collect();

        let mut errors = BTreeMap::new();
        for script in &self.config.processes {
            if let Err(e) = self.drive(script, &mut events, &mut failures_rx).await {
                warn!("Process {} did not complete: {:#}", script.id, e);
                errors.insert(script.key(), format!("{:#}", e));
            }
        }

        for agent in agents {
            agent.abort();
        }
        let report = self.report(&errors);
        info!("Simulation finished with {} events", report.events.len());
        Ok(report)
    }

    async fn drive(
        &self,
        script: &ProcessScript,
        events: &mut broadcast::Receiver<EventRecord>,
        failures: &mut mpsc::UnboundedReceiver<AgentFailure>,
    ) -> Result<()> {
        let key = script.key();
        let (customer, process_id) = (key.customer, key.process_id);
        let (broker, token) = (self.broker, self.deposit_token);
        let steps = self.config.blocks_per_step;

        info!("Opening process {} for {}", script.id, script.customer);
        self.shared.with(|p| match script.rail {
            Rail::Native => p.create_process(&customer, &broker, process_id, &script.data),
            Rail::Token => p.create_token_process(&customer, &token, &broker, process_id, &script.data),
        })?;
        wait_for(events, failures, &key, |e| matches!(e, ProtocolEvent::CostSet { .. })).await?;
        self.shared.with(|p| p.mine(steps));

        self.shared.with(|p| -> Result<()> {
            let cost = p.get_process(&customer, &process_id)?.cost_amount;
            match script.rail {
                Rail::Native => p.deposit_native(&customer, &process_id, cost)?,
                Rail::Token => {
                    let custody = p.custody();
                    p.bank_mut().approve(&token, &customer, &custody, cost)?;
                    p.deposit(&customer, &process_id, cost)?;
                }
            }
            for action in &script.actions {
                p.declare_action(&broker, &customer, &process_id, action)?;
            }
            p.mine(steps);
            p.start_termination(&customer, &customer, &process_id)?;
            Ok(())
        })?;
        wait_for(events, failures, &key, |e| matches!(e, ProtocolEvent::Completed { .. })).await?;
        self.shared.with(|p| p.mine(steps));
        Ok(())
    }

    fn report(&self, errors: &BTreeMap<ProcessKey, String>) -> SimulationReport {
        let stake_token = Address::from_label(STAKE_TOKEN_LABEL);
        self.shared.read(|p| {
            let processes = self
                .config
                .processes
                .iter()
                .map(|script| {
                    let key = script.key();
                    let process = p.get_process(&key.customer, &key.process_id).ok();
                    ProcessReport {
                        id: script.id.clone(),
                        customer: script.customer.clone(),
                        state: process
                            .as_ref()
                            .map(|x| x.state.to_string())
                            .unwrap_or_else(|| "NOT_CREATED".to_string()),
                        cost: process.as_ref().map(|x| x.cost_amount).unwrap_or(0),
                        verdict: process.as_ref().and_then(|x| x.verdict),
                        retained_fee: process.as_ref().map(|x| x.retained_fee).unwrap_or(0),
                        dissenters: process
                            .as_ref()
                            .map(|x| x.dissenters.iter().map(|d| self.names.name(d)).collect())
                            .unwrap_or_default(),
                        error: errors.get(&key).cloned(),
                    }
                })
                .collect();

            let stakes = self
                .config
                .service
                .validators
                .iter()
                .map(|v| {
                    let stake = p
                        .stake_of(&self.broker, &Address::from_label(&v.name))
                        .unwrap_or_default();
                    StakeReport {
                        validator: v.name.clone(),
                        amount: stake.amount,
                        total_slashed: stake.total_slashed,
                    }
                })
                .collect();

            SimulationReport {
                processes,
                stakes,
                total_staked: p.total_staked(),
                treasury_native: p.treasury_balance(&Currency::Native),
                treasury_stake_token: p.treasury_balance(&Currency::Token(stake_token)),
                treasury_deposit_token: p.treasury_balance(&Currency::Token(self.deposit_token)),
                events: p.events_since(0),
            }
        })
    }

    pub fn admin(&self) -> Address {
        self.admin
    }
}

fn request_key(event: &ProtocolEvent) -> Option<ProcessKey> {
    match event {
        ProtocolEvent::CostSet { customer, process_id, .. }
        | ProtocolEvent::Completed { customer, process_id, .. }
        | ProtocolEvent::CostRequest { customer, process_id, .. }
        | ProtocolEvent::TerminationRequest { customer, process_id, .. } => {
            Some(ProcessKey::new(*customer, *process_id))
        }
        _ => None,
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<EventRecord>,
    failures: &mut mpsc::UnboundedReceiver<AgentFailure>,
    key: &ProcessKey,
    done: impl Fn(&ProtocolEvent) -> bool,
) -> Result<()> {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(record) => {
                    if request_key(&record.event).as_ref() == Some(key) && done(&record.event) {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Driver lagged behind by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("event stream closed"),
            },
            Some(failure) = failures.recv() => {
                if failure.key == *key {
                    return Err(failure.error).context("validator submission rejected");
                }
            }
        }
    }
}

fn spawn_agent(
    shared: SharedProtocol<InMemoryBank>,
    me: Address,
    scripts: Arc<BTreeMap<ProcessKey, ProcessScript>>,
    failures: mpsc::UnboundedSender<AgentFailure>,
) -> JoinHandle<()> {
    let mut events = shared.subscribe();
    tokio::spawn(async move {
        loop {
            let record = match events.recv().await {
                Ok(record) => record,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Validator {} lagged behind by {} events", me, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let (key, result) = match record.event {
                ProtocolEvent::CostRequest {
                    customer,
                    process_id,
                    round,
                    validator,
                    ..
                } if validator == me => {
                    let key = ProcessKey::new(customer, process_id);
                    let Some(script) = scripts.get(&key) else { continue };
                    let deposit_addr = Address::from_label(&script.deposit_to);
                    let amount = script.quote(round);
                    let result = shared.with(|p| {
                        p.set_process_cost(&me, &customer, &process_id, amount, deposit_addr)
                    });
                    (key, result.map(|_| ()))
                }
                ProtocolEvent::TerminationRequest {
                    customer,
                    process_id,
                    round,
                    validator,
                    ..
                } if validator == me => {
                    let key = ProcessKey::new(customer, process_id);
                    let Some(script) = scripts.get(&key) else { continue };
                    let vote = script.vote(round);
                    let result =
                        shared.with(|p| p.validate_termination(&me, &customer, &process_id, vote));
                    (key, result.map(|_| ()))
                }
                _ => continue,
            };
            if let Err(error) = result {
                let _ = failures.send(AgentFailure { key, error });
            }
        }
    })
}
