/// PROTOCOL FACADE
///
/// Every mutating operation runs against a scratch copy of the protocol
/// state (registries, stake ledger, treasury, asset bank) and is committed
/// only if it returns `Ok`. A failure at any point, including a transfer
/// rejected by the asset bank halfway through a payout, leaves the state
/// exactly as it was and discards the events the call produced.
///
/// Committed events are appended to the event log and broadcast to
/// subscribers. Validators learn that they were assigned from
/// `CostRequest` / `TerminationRequest` events; nothing here blocks.

use arbitra_consensus::{Advance, SeedInput, Selection, ValidatorSelector};
use arbitra_core::{
    Address, Amount, ChainClock, ConfigError, Currency, EventLog, EventRecord, FeeSchedule,
    FeeShares, Phase, ProcessId, ProcessState, ProtocolConfig, ProtocolError, ProtocolEvent,
    RewardKind, Role, Service,
};
use arbitra_economics::{AssetBank, FeeRouter, Stake, StakeLedger, Treasury};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use tokio::sync::broadcast;

use crate::process_registry::{CostQuote, Process, ProcessRegistry};
use crate::service_registry::ServiceRegistry;

/// Label the default custody address is derived from.
pub const CUSTODY_LABEL: &str = "arbitra.custody";

/// Genesis timestamp of a freshly constructed protocol clock.
const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
struct ProtocolState<B> {
    config: ProtocolConfig,
    chain: ChainClock,
    services: ServiceRegistry,
    processes: ProcessRegistry,
    ledger: StakeLedger,
    treasury: Treasury,
    bank: B,
    admins: BTreeSet<Address>,
    custody: Address,
    /// Events produced by the running call, flushed to the log on commit
    emitted: Vec<ProtocolEvent>,
}

pub struct Protocol<B: AssetBank + Clone> {
    state: ProtocolState<B>,
    selector: ValidatorSelector,
    events: EventLog,
    events_tx: broadcast::Sender<EventRecord>,
}

impl<B: AssetBank + Clone> Protocol<B> {
    /// Deploy the protocol. `admin` becomes the first protocol admin and
    /// `stake_token` the token validators stake in.
    pub fn new(
        config: ProtocolConfig,
        admin: Address,
        stake_token: Address,
        bank: B,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let chain = ChainClock::genesis(DEFAULT_GENESIS_TIMESTAMP, config.block_time_secs);
        info!(
            "Protocol deployed: admin {}, stake token {}, penalty {}%, lock {} blocks",
            admin, stake_token, config.penalty_perc, config.locking_period
        );
        Ok(Protocol {
            state: ProtocolState {
                config,
                chain,
                services: ServiceRegistry::new(),
                processes: ProcessRegistry::new(),
                ledger: StakeLedger::new(stake_token),
                treasury: Treasury::new(),
                bank,
                admins: BTreeSet::from([admin]),
                custody: Address::from_label(CUSTODY_LABEL),
                emitted: Vec::new(),
            },
            selector: ValidatorSelector::default(),
            events: EventLog::new(),
            events_tx,
        })
    }

    pub fn with_selector(mut self, selector: ValidatorSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_clock(mut self, chain: ChainClock) -> Self {
        self.state.chain = chain;
        self
    }

    pub fn with_custody(mut self, custody: Address) -> Self {
        self.state.custody = custody;
        self
    }

    fn transact<T, F>(&mut self, operation: &'static str, f: F) -> Result<T, ProtocolError>
    where
        F: FnOnce(&mut ProtocolState<B>, &ValidatorSelector) -> Result<T, ProtocolError>,
    {
        let mut scratch = self.state.clone();
        scratch.emitted.clear();
        match f(&mut scratch, &self.selector) {
            Ok(out) => {
                let emitted = std::mem::take(&mut scratch.emitted);
                self.state = scratch;
                let height = self.state.chain.height();
                for event in emitted {
                    let record = self.events.emit(height, event).clone();
                    // No subscribers is not an error
                    let _ = self.events_tx.send(record);
                }
                debug!("{} committed at block {}", operation, height);
                Ok(out)
            }
            Err(e) => {
                warn!("{} rejected: {}", operation, e);
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------
    // Services
    // ---------------------------------------------------------------

    pub fn add_service(
        &mut self,
        caller: &Address,
        admin: Address,
        validators: Vec<Address>,
    ) -> Result<(), ProtocolError> {
        let shares = self.state.config.default_shares;
        self.add_service_with_shares(caller, admin, validators, shares)
    }

    pub fn add_service_with_shares(
        &mut self,
        caller: &Address,
        admin: Address,
        validators: Vec<Address>,
        shares: FeeShares,
    ) -> Result<(), ProtocolError> {
        self.transact("add_service", |s, _| {
            s.ensure_admin(caller)?;
            shares.validate(s.config.share_denominator)?;
            let service = s.services.add(admin, validators, shares)?;
            let event = ProtocolEvent::ServiceAdded {
                admin,
                validators: service.validators.clone(),
                shares,
            };
            s.emit(event);
            Ok(())
        })
    }

    pub fn set_validators(
        &mut self,
        caller: &Address,
        service_admin: &Address,
        validators: Vec<Address>,
    ) -> Result<(), ProtocolError> {
        self.transact("set_validators", |s, _| {
            s.ensure_service_owner(caller, service_admin)?;
            s.services.set_validators(service_admin, validators.clone())?;
            s.emit(ProtocolEvent::ValidatorsUpdated {
                admin: *service_admin,
                validators,
            });
            Ok(())
        })
    }

    pub fn set_service_shares(
        &mut self,
        caller: &Address,
        service_admin: &Address,
        shares: FeeShares,
    ) -> Result<(), ProtocolError> {
        self.transact("set_service_shares", |s, _| {
            s.ensure_service_owner(caller, service_admin)?;
            shares.validate(s.config.share_denominator)?;
            s.services.set_shares(service_admin, shares)?;
            s.emit(ProtocolEvent::SharesUpdated {
                admin: *service_admin,
                shares,
            });
            Ok(())
        })
    }

    // ---------------------------------------------------------------
    // Staking
    // ---------------------------------------------------------------

    /// Stake `amount` of the stake token on `service_admin`. The caller is
    /// the validator and must have approved the custody address.
    pub fn stake(
        &mut self,
        caller: &Address,
        service_admin: &Address,
        amount: Amount,
    ) -> Result<Stake, ProtocolError> {
        self.transact("stake", |s, _| {
            let service = s.services.get(service_admin)?;
            let now = s.chain.height();
            let stake = s.ledger.stake(
                &mut s.bank,
                &s.custody,
                service,
                caller,
                amount,
                now,
                s.config.locking_period,
            )?;
            s.emit(ProtocolEvent::Staked {
                service: *service_admin,
                validator: *caller,
                amount,
                locked_until: stake.locked_until,
            });
            Ok(stake)
        })
    }

    pub fn unstake(
        &mut self,
        caller: &Address,
        service_admin: &Address,
        amount: Amount,
    ) -> Result<Stake, ProtocolError> {
        self.transact("unstake", |s, _| {
            s.services.get(service_admin)?;
            let now = s.chain.height();
            let stake = s
                .ledger
                .unstake(&mut s.bank, &s.custody, service_admin, caller, amount, now)?;
            s.emit(ProtocolEvent::Unstaked {
                service: *service_admin,
                validator: *caller,
                amount,
            });
            Ok(stake)
        })
    }

    // ---------------------------------------------------------------
    // Process lifecycle
    // ---------------------------------------------------------------

    /// Open a native-rail process. The caller is the customer.
    pub fn create_process(
        &mut self,
        caller: &Address,
        service_admin: &Address,
        process_id: ProcessId,
        data: &str,
    ) -> Result<(), ProtocolError> {
        self.transact("create_process", |s, selector| {
            s.create(selector, caller, service_admin, process_id, Currency::Native, data)
        })
    }

    /// Open a process paid in `token`.
    pub fn create_token_process(
        &mut self,
        caller: &Address,
        token: &Address,
        service_admin: &Address,
        process_id: ProcessId,
        data: &str,
    ) -> Result<(), ProtocolError> {
        self.transact("create_token_process", |s, selector| {
            // Rejects tokens the bank does not know
            s.bank.token_balance(token, caller)?;
            s.create(
                selector,
                caller,
                service_admin,
                process_id,
                Currency::Token(*token),
                data,
            )
        })
    }

    /// Cost submission by the validator assigned to the process.
    pub fn set_process_cost(
        &mut self,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
        amount: Amount,
        deposit_addr: Address,
    ) -> Result<ProcessState, ProtocolError> {
        self.transact("set_process_cost", |s, selector| {
            s.submit_cost(selector, caller, customer, process_id, CostQuote { amount, deposit_addr })
        })
    }

    /// Token-rail deposit of exactly the agreed cost. The caller is the
    /// customer and must have approved the custody address.
    pub fn deposit(
        &mut self,
        caller: &Address,
        process_id: &ProcessId,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.transact("deposit", |s, _| s.deposit(caller, process_id, false, amount))
    }

    /// Native-rail deposit; `value` is the native amount carried by the call.
    pub fn deposit_native(
        &mut self,
        caller: &Address,
        process_id: &ProcessId,
        value: Amount,
    ) -> Result<(), ProtocolError> {
        self.transact("deposit_native", |s, _| s.deposit(caller, process_id, true, value))
    }

    /// Bare native transfer to the protocol. Settles the caller's only
    /// native-rail process awaiting its deposit.
    pub fn receive_native(&mut self, caller: &Address, value: Amount) -> Result<ProcessId, ProtocolError> {
        self.transact("receive_native", |s, _| {
            let pending = s.processes.awaiting_native_deposit(caller);
            let process_id = match pending.as_slice() {
                [] => return Err(ProtocolError::NoPendingDeposit(*caller)),
                [only] => *only,
                many => {
                    return Err(ProtocolError::AmbiguousDeposit {
                        customer: *caller,
                        count: many.len(),
                    })
                }
            };
            s.deposit(caller, &process_id, true, value)?;
            Ok(process_id)
        })
    }

    /// Broker appends an action to the process record.
    pub fn declare_action(
        &mut self,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
        text: &str,
    ) -> Result<(), ProtocolError> {
        self.transact("declare_action", |s, _| {
            let process = s.processes.get_mut(customer, process_id)?;
            process.ensure_state(&[ProcessState::Deposited], "declare_action")?;
            if *caller != process.service_admin {
                return Err(ProtocolError::unauthorized(caller, Role::Broker));
            }
            process.actions.push(text.to_string());
            let index = process.actions.len() - 1;
            s.emit(ProtocolEvent::ActionDeclared {
                customer: *customer,
                process_id: *process_id,
                index,
                text: text.to_string(),
            });
            Ok(())
        })
    }

    /// Customer or broker asks validators to confirm completion.
    pub fn start_termination(
        &mut self,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
    ) -> Result<(), ProtocolError> {
        self.transact("start_termination", |s, selector| {
            s.start_termination(selector, caller, customer, process_id)
        })
    }

    /// Termination vote by the validator assigned to the process.
    pub fn validate_termination(
        &mut self,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
        vote: bool,
    ) -> Result<ProcessState, ProtocolError> {
        self.transact("validate_termination", |s, selector| {
            s.submit_termination(selector, caller, customer, process_id, vote)
        })
    }

    // ---------------------------------------------------------------
    // Governance
    // ---------------------------------------------------------------

    pub fn set_fee(&mut self, caller: &Address, numerator: u128, denominator: u128) -> Result<(), ProtocolError> {
        self.transact("set_fee", |s, _| {
            s.ensure_admin(caller)?;
            let fee = FeeSchedule { numerator, denominator };
            fee.validate()?;
            s.config.fee = fee;
            s.parameter_changed("fee", format!("{}/{}", numerator, denominator));
            Ok(())
        })
    }

    pub fn set_penalty_perc(&mut self, caller: &Address, penalty_perc: u32) -> Result<(), ProtocolError> {
        self.transact("set_penalty_perc", |s, _| {
            s.ensure_admin(caller)?;
            if penalty_perc > 100 {
                return Err(ConfigError::InvalidPenalty(penalty_perc).into());
            }
            s.config.penalty_perc = penalty_perc;
            s.parameter_changed("penalty_perc", penalty_perc.to_string());
            Ok(())
        })
    }

    pub fn set_locking_period(&mut self, caller: &Address, blocks: u64) -> Result<(), ProtocolError> {
        self.transact("set_locking_period", |s, _| {
            s.ensure_admin(caller)?;
            s.config.locking_period = blocks;
            s.parameter_changed("locking_period", blocks.to_string());
            Ok(())
        })
    }

    /// Shares applied to services registered from now on.
    pub fn set_default_shares(&mut self, caller: &Address, shares: FeeShares) -> Result<(), ProtocolError> {
        self.transact("set_default_shares", |s, _| {
            s.ensure_admin(caller)?;
            shares.validate(s.config.share_denominator)?;
            s.config.default_shares = shares;
            s.parameter_changed(
                "default_shares",
                format!("{}/{}/{}", shares.validators, shares.broker, shares.protocol),
            );
            Ok(())
        })
    }

    pub fn withdraw_treasury(
        &mut self,
        caller: &Address,
        currency: Currency,
        to: &Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        self.transact("withdraw_treasury", |s, _| {
            s.ensure_admin(caller)?;
            s.treasury.debit(currency, amount)?;
            s.bank.pay(&currency, &s.custody, to, amount)?;
            s.emit(ProtocolEvent::TreasuryWithdrawn {
                currency,
                to: *to,
                amount,
            });
            Ok(())
        })
    }

    pub fn grant_admin(&mut self, caller: &Address, admin: Address) -> Result<(), ProtocolError> {
        self.transact("grant_admin", |s, _| {
            s.ensure_admin(caller)?;
            if s.admins.insert(admin) {
                s.emit(ProtocolEvent::AdminChanged { admin, granted: true });
            }
            Ok(())
        })
    }

    pub fn revoke_admin(&mut self, caller: &Address, admin: &Address) -> Result<(), ProtocolError> {
        self.transact("revoke_admin", |s, _| {
            s.ensure_admin(caller)?;
            if !s.admins.contains(admin) {
                return Ok(());
            }
            if s.admins.len() == 1 {
                return Err(ProtocolError::LastAdmin);
            }
            s.admins.remove(admin);
            s.emit(ProtocolEvent::AdminChanged {
                admin: *admin,
                granted: false,
            });
            Ok(())
        })
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn get_process(&self, customer: &Address, process_id: &ProcessId) -> Result<Process, ProtocolError> {
        self.state.processes.get(customer, process_id).cloned()
    }

    pub fn get_service(&self, admin: &Address) -> Result<Service, ProtocolError> {
        self.state.services.get(admin).cloned()
    }

    pub fn stake_of(&self, service_admin: &Address, validator: &Address) -> Result<Stake, ProtocolError> {
        self.state.services.get(service_admin)?;
        Ok(self.state.ledger.stake_of(service_admin, validator))
    }

    pub fn total_staked(&self) -> Amount {
        self.state.ledger.total_staked()
    }

    pub fn treasury_balance(&self, currency: &Currency) -> Amount {
        self.state.treasury.balance(currency)
    }

    pub fn is_admin(&self, who: &Address) -> bool {
        self.state.admins.contains(who)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.state.config
    }

    /// Address that holds stakes, retained fees and treasury funds.
    pub fn custody(&self) -> Address {
        self.state.custody
    }

    pub fn stake_token(&self) -> Address {
        self.state.ledger.stake_token()
    }

    pub fn height(&self) -> u64 {
        self.state.chain.height()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_since(&self, seq: u64) -> Vec<EventRecord> {
        self.events.since(seq).to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events_tx.subscribe()
    }

    pub fn ledger(&self) -> &StakeLedger {
        &self.state.ledger
    }

    // ---------------------------------------------------------------
    // Host environment
    // ---------------------------------------------------------------

    pub fn bank(&self) -> &B {
        &self.state.bank
    }

    /// Direct access for funding accounts and approvals; these are actions
    /// of the outside world, not protocol operations.
    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.state.bank
    }

    pub fn mine(&mut self, blocks: u64) -> u64 {
        self.state.chain.mine(blocks).height
    }
}

impl<B: AssetBank> ProtocolState<B> {
    fn emit(&mut self, event: ProtocolEvent) {
        self.emitted.push(event);
    }

    fn parameter_changed(&mut self, name: &str, value: String) {
        info!("Protocol parameter {} set to {}", name, value);
        self.emit(ProtocolEvent::ParameterChanged {
            name: name.to_string(),
            value,
        });
    }

    fn ensure_admin(&self, caller: &Address) -> Result<(), ProtocolError> {
        if self.admins.contains(caller) {
            Ok(())
        } else {
            Err(ProtocolError::unauthorized(caller, Role::Admin))
        }
    }

    fn ensure_service_owner(&self, caller: &Address, service_admin: &Address) -> Result<(), ProtocolError> {
        self.services.get(service_admin)?;
        if caller == service_admin || self.admins.contains(caller) {
            Ok(())
        } else {
            Err(ProtocolError::unauthorized(caller, Role::ServiceOwner))
        }
    }

    fn seed_input(&self, customer: &Address, process_id: &ProcessId, phase: Phase, round: u32) -> SeedInput {
        SeedInput {
            block: self.chain.current(),
            customer: *customer,
            process_id: *process_id,
            phase,
            round,
        }
    }

    fn request_event(phase: Phase, customer: &Address, process_id: &ProcessId, round: u32, selection: Selection) -> ProtocolEvent {
        match phase {
            Phase::Cost => ProtocolEvent::CostRequest {
                customer: *customer,
                process_id: *process_id,
                round,
                validator: selection.validator,
                candidates: selection.candidates,
            },
            Phase::Termination => ProtocolEvent::TerminationRequest {
                customer: *customer,
                process_id: *process_id,
                round,
                validator: selection.validator,
                candidates: selection.candidates,
            },
        }
    }

    fn create(
        &mut self,
        selector: &ValidatorSelector,
        customer: &Address,
        service_admin: &Address,
        process_id: ProcessId,
        currency: Currency,
        data: &str,
    ) -> Result<(), ProtocolError> {
        let service = self.services.get(service_admin)?;
        if self.processes.contains(customer, &process_id) {
            return Err(ProtocolError::ProcessExists {
                customer: *customer,
                process_id,
            });
        }

        let input = self.seed_input(customer, &process_id, Phase::Cost, 1);
        let selection = selector.select(service, &self.ledger, &BTreeSet::new(), &input)?;

        let process = Process::new(
            *customer,
            process_id,
            *service_admin,
            currency,
            data.to_string(),
            self.chain.height(),
            arbitra_consensus::ConsensusRound::open(selection.clone()),
        );
        self.processes.insert(process)?;

        info!(
            "Process {} opened by {} on service {} ({}), cost validator {}",
            process_id, customer, service_admin, currency, selection.validator
        );
        self.emit(ProtocolEvent::ProcessCreated {
            customer: *customer,
            process_id,
            service: *service_admin,
            currency,
        });
        self.emit(Self::request_event(Phase::Cost, customer, &process_id, 1, selection));
        Ok(())
    }

    fn submit_cost(
        &mut self,
        selector: &ValidatorSelector,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
        quote: CostQuote,
    ) -> Result<ProcessState, ProtocolError> {
        let policy = self.config.exclusion_policy;
        let block = self.chain.current();
        let process = self.processes.get_mut(customer, process_id)?;
        process.ensure_state(
            &[ProcessState::Created, ProcessState::CostPending],
            "set_process_cost",
        )?;
        if process.cost_round.assigned() != Some(caller) {
            return Err(ProtocolError::unauthorized(caller, Role::AssignedValidator));
        }
        if quote.amount == 0 {
            return Err(ProtocolError::InvalidAmount("cost must be > 0"));
        }
        let service = self.services.get(&process.service_admin)?;
        let ledger = &self.ledger;

        let advance = process.cost_round.submit(caller, quote, policy, |excluded, round| {
            let input = SeedInput {
                block,
                customer: *customer,
                process_id: *process_id,
                phase: Phase::Cost,
                round,
            };
            selector.select(service, ledger, excluded, &input)
        })?;

        let mut events = vec![ProtocolEvent::CostProposed {
            customer: *customer,
            process_id: *process_id,
            validator: *caller,
            amount: quote.amount,
            deposit_addr: quote.deposit_addr,
        }];
        let mut dissenters = Vec::new();
        match advance {
            Advance::Awaiting { round, selection } => {
                process.advance(ProcessState::CostPending, "set_process_cost")?;
                debug!("Cost of {} disputed, round {} assigned to {}", process_id, round, selection.validator);
                events.push(Self::request_event(Phase::Cost, customer, process_id, round, selection));
            }
            Advance::Agreed {
                value,
                dissenters: against,
                participants,
                ..
            } => {
                process.advance(ProcessState::CostSet, "set_process_cost")?;
                process.cost_amount = value.amount;
                process.deposit_addr = value.deposit_addr;
                process.record_participants(&participants, &against);
                info!("Cost of {} agreed: {}", process_id, value);
                events.push(ProtocolEvent::CostSet {
                    customer: *customer,
                    process_id: *process_id,
                    amount: value.amount,
                    deposit_addr: value.deposit_addr,
                });
                dissenters = against;
            }
        }
        let state = process.state;
        let service_admin = process.service_admin;

        for event in events {
            self.emit(event);
        }
        self.slash_dissenters(&service_admin, &dissenters)?;
        Ok(state)
    }

    fn slash_dissenters(&mut self, service_admin: &Address, dissenters: &[Address]) -> Result<(), ProtocolError> {
        let policy = self.config.slash_policy;
        let penalty = self.config.penalty_perc;
        let now = self.chain.height();
        for validator in dissenters {
            let amount = self.ledger.slash(
                &mut self.bank,
                &self.custody,
                &mut self.treasury,
                service_admin,
                validator,
                penalty,
                policy,
                now,
            )?;
            if amount > 0 {
                self.emit(ProtocolEvent::Slashed {
                    service: *service_admin,
                    validator: *validator,
                    amount,
                    policy,
                });
            }
        }
        Ok(())
    }

    fn deposit(
        &mut self,
        caller: &Address,
        process_id: &ProcessId,
        native: bool,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        let router = FeeRouter::from_config(&self.config);
        let process = self.processes.get_mut(caller, process_id)?;
        process.ensure_state(&[ProcessState::CostSet], "deposit")?;
        match (process.currency, native) {
            (Currency::Native, false) => {
                return Err(ProtocolError::CurrencyMismatch {
                    expected: Currency::Native,
                    got: Currency::Token(Address::ZERO),
                })
            }
            (Currency::Token(token), true) => {
                return Err(ProtocolError::CurrencyMismatch {
                    expected: Currency::Token(token),
                    got: Currency::Native,
                })
            }
            _ => {}
        }
        if amount != process.cost_amount {
            return Err(ProtocolError::AmountMismatch {
                expected: process.cost_amount,
                got: amount,
            });
        }

        let split = router.route_deposit(
            &mut self.bank,
            &process.currency,
            caller,
            &self.custody,
            &process.deposit_addr,
            amount,
        )?;
        process.retained_fee = split.protocol_fee;
        process.advance(ProcessState::Deposited, "deposit")?;
        let deposit_addr = process.deposit_addr;

        info!(
            "Process {} funded with {}: {} paid to {}, {} retained",
            process_id, amount, split.payout, deposit_addr, split.protocol_fee
        );
        self.emit(ProtocolEvent::Deposited {
            customer: *caller,
            process_id: *process_id,
            amount,
            protocol_fee: split.protocol_fee,
            payout: split.payout,
            deposit_addr,
        });
        Ok(())
    }

    fn start_termination(
        &mut self,
        selector: &ValidatorSelector,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
    ) -> Result<(), ProtocolError> {
        let input = self.seed_input(customer, process_id, Phase::Termination, 1);
        let process = self.processes.get_mut(customer, process_id)?;
        process.ensure_state(&[ProcessState::Deposited], "start_termination")?;
        if !process.is_customer_or_broker(caller) {
            return Err(ProtocolError::unauthorized(caller, Role::Party));
        }
        let service = self.services.get(&process.service_admin)?;
        let selection = selector.select(service, &self.ledger, &BTreeSet::new(), &input)?;

        process.termination_round = arbitra_consensus::ConsensusRound::open(selection.clone());
        process.advance(ProcessState::Terminating, "start_termination")?;

        info!(
            "Termination of {} requested by {}, validator {}",
            process_id, caller, selection.validator
        );
        self.emit(Self::request_event(Phase::Termination, customer, process_id, 1, selection));
        Ok(())
    }

    fn submit_termination(
        &mut self,
        selector: &ValidatorSelector,
        caller: &Address,
        customer: &Address,
        process_id: &ProcessId,
        vote: bool,
    ) -> Result<ProcessState, ProtocolError> {
        let policy = self.config.exclusion_policy;
        let block = self.chain.current();
        let process = self.processes.get_mut(customer, process_id)?;
        process.ensure_state(&[ProcessState::Terminating], "validate_termination")?;
        let service = self.services.get(&process.service_admin)?;
        let ledger = &self.ledger;

        let advance = process.termination_round.submit(caller, vote, policy, |excluded, round| {
            let input = SeedInput {
                block,
                customer: *customer,
                process_id: *process_id,
                phase: Phase::Termination,
                round,
            };
            selector.select(service, ledger, excluded, &input)
        })?;

        let mut events = vec![ProtocolEvent::TerminationVoted {
            customer: *customer,
            process_id: *process_id,
            validator: *caller,
            vote,
        }];
        let outcome = match advance {
            Advance::Awaiting { round, selection } => {
                debug!("Termination of {} disputed, round {} assigned to {}", process_id, round, selection.validator);
                events.push(Self::request_event(Phase::Termination, customer, process_id, round, selection));
                None
            }
            Advance::Agreed {
                value,
                dissenters,
                participants,
                ..
            } => {
                process.advance(ProcessState::Completed, "validate_termination")?;
                process.verdict = Some(value);
                process.record_participants(&participants, &dissenters);
                info!("Process {} completed with verdict {}", process_id, value);
                Some((value, dissenters))
            }
        };
        let state = process.state;
        let service_admin = process.service_admin;
        let currency = process.currency;
        let retained_fee = process.retained_fee;
        let honest = process.honest_validators();

        for event in events {
            self.emit(event);
        }
        let (verdict, dissenters) = match outcome {
            Some(done) => done,
            None => return Ok(state),
        };

        self.slash_dissenters(&service_admin, &dissenters)?;
        self.distribute(customer, process_id, &service_admin, currency, retained_fee, &honest)?;
        self.emit(ProtocolEvent::Completed {
            customer: *customer,
            process_id: *process_id,
            verdict,
        });
        Ok(state)
    }

    fn distribute(
        &mut self,
        customer: &Address,
        process_id: &ProcessId,
        service_admin: &Address,
        currency: Currency,
        pool: Amount,
        honest: &[Address],
    ) -> Result<(), ProtocolError> {
        let router = FeeRouter::from_config(&self.config);
        let shares = self.services.get(service_admin)?.shares;
        let plan = router.plan_distribution(pool, &shares, service_admin, honest);
        router.pay_distribution(&mut self.bank, &currency, &self.custody, &mut self.treasury, &plan)?;

        let mut rewards = vec![(plan.broker, plan.broker_amount, RewardKind::Broker)];
        rewards.extend(
            plan.validators
                .iter()
                .map(|(v, amount)| (*v, *amount, RewardKind::Validator)),
        );
        rewards.push((self.custody, plan.treasury, RewardKind::Treasury));
        for (recipient, amount, kind) in rewards {
            if amount == 0 {
                continue;
            }
            self.emit(ProtocolEvent::RewardPaid {
                customer: *customer,
                process_id: *process_id,
                recipient,
                amount,
                kind,
            });
        }
        Ok(())
    }
}
