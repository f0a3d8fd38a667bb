// Shared fixture for the protocol integration tests: one protocol admin,
// one broker service, a funded customer and a panel of funded validators.

#![allow(dead_code)]

use arbitra_core::{Address, Amount, ProcessId, ProcessState, ProtocolConfig, ProtocolEvent};
use arbitra_economics::{AssetBank, InMemoryBank};
use arbitra_protocol::Protocol;

pub const FUNDING: Amount = 1_000_000_000;

pub struct World {
    pub protocol: Protocol<InMemoryBank>,
    pub admin: Address,
    pub broker: Address,
    pub customer: Address,
    pub stake_token: Address,
    pub deposit_token: Address,
    pub validators: Vec<Address>,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Service with one validator per entry of `stakes`; zero entries stay unstaked.
pub fn world(stakes: &[Amount]) -> World {
    world_with(ProtocolConfig::default(), stakes)
}

pub fn world_with(config: ProtocolConfig, stakes: &[Amount]) -> World {
    init_logging();
    let admin = Address::from_label("protocol-admin");
    let broker = Address::from_label("broker");
    let customer = Address::from_label("customer");
    let stake_token = Address::from_label("stake-token");
    let deposit_token = Address::from_label("deposit-token");
    let validators: Vec<Address> = (0..stakes.len())
        .map(|i| Address::from_label(&format!("validator-{}", i)))
        .collect();

    let mut bank = InMemoryBank::new();
    bank.register_token(stake_token, "STK");
    bank.register_token(deposit_token, "DEP");
    bank.mint_native(&customer, FUNDING);
    bank.mint(&deposit_token, &customer, FUNDING).unwrap();

    let mut protocol = Protocol::new(config, admin, stake_token, bank).unwrap();
    let custody = protocol.custody();
    for v in &validators {
        let bank = protocol.bank_mut();
        bank.mint(&stake_token, v, FUNDING).unwrap();
        bank.approve(&stake_token, v, &custody, FUNDING).unwrap();
    }
    protocol
        .add_service(&admin, broker, validators.clone())
        .unwrap();
    for (v, amount) in validators.iter().zip(stakes) {
        if *amount > 0 {
            protocol.stake(v, &broker, *amount).unwrap();
        }
    }

    World {
        protocol,
        admin,
        broker,
        customer,
        stake_token,
        deposit_token,
        validators,
    }
}

impl World {
    pub fn state(&self, process_id: &ProcessId) -> ProcessState {
        self.protocol
            .get_process(&self.customer, process_id)
            .unwrap()
            .state
    }

    pub fn cost_validator(&self, process_id: &ProcessId) -> Address {
        *self
            .protocol
            .get_process(&self.customer, process_id)
            .unwrap()
            .cost_round
            .assigned()
            .unwrap()
    }

    pub fn termination_validator(&self, process_id: &ProcessId) -> Address {
        *self
            .protocol
            .get_process(&self.customer, process_id)
            .unwrap()
            .termination_round
            .assigned()
            .unwrap()
    }

    pub fn stake(&self, validator: &Address) -> Amount {
        self.protocol.stake_of(&self.broker, validator).unwrap().amount
    }

    pub fn open_native(&mut self, label: &str) -> ProcessId {
        let id = ProcessId::from_label(label);
        self.protocol
            .create_process(&self.customer, &self.broker, id, "fix the roof")
            .unwrap();
        id
    }

    pub fn open_token(&mut self, label: &str) -> ProcessId {
        let id = ProcessId::from_label(label);
        let token = self.deposit_token;
        self.protocol
            .create_token_process(&self.customer, &token, &self.broker, id, "fix the roof")
            .unwrap();
        id
    }

    /// Cost validator submits `value`; returns who submitted.
    pub fn propose_cost(&mut self, process_id: &ProcessId, amount: Amount, deposit_addr: Address) -> Address {
        let validator = self.cost_validator(process_id);
        let customer = self.customer;
        self.protocol
            .set_process_cost(&validator, &customer, process_id, amount, deposit_addr)
            .unwrap();
        validator
    }

    /// Two consecutive validators quote the same cost.
    pub fn agree_cost(&mut self, process_id: &ProcessId, amount: Amount, deposit_addr: Address) {
        self.propose_cost(process_id, amount, deposit_addr);
        self.propose_cost(process_id, amount, deposit_addr);
        assert_eq!(self.state(process_id), ProcessState::CostSet);
    }

    pub fn fund_native(&mut self, process_id: &ProcessId) {
        let cost = self
            .protocol
            .get_process(&self.customer, process_id)
            .unwrap()
            .cost_amount;
        let customer = self.customer;
        self.protocol.deposit_native(&customer, process_id, cost).unwrap();
    }

    pub fn fund_token(&mut self, process_id: &ProcessId) {
        let cost = self
            .protocol
            .get_process(&self.customer, process_id)
            .unwrap()
            .cost_amount;
        let (customer, token, custody) = (self.customer, self.deposit_token, self.protocol.custody());
        self.protocol
            .bank_mut()
            .approve(&token, &customer, &custody, cost)
            .unwrap();
        self.protocol.deposit(&customer, process_id, cost).unwrap();
    }

    pub fn vote(&mut self, process_id: &ProcessId, vote: bool) -> Address {
        let validator = self.termination_validator(process_id);
        let customer = self.customer;
        self.protocol
            .validate_termination(&validator, &customer, process_id, vote)
            .unwrap();
        validator
    }

    /// Start termination and have two validators confirm it.
    pub fn complete(&mut self, process_id: &ProcessId) {
        let customer = self.customer;
        self.protocol
            .start_termination(&customer, &customer, process_id)
            .unwrap();
        self.vote(process_id, true);
        self.vote(process_id, true);
        assert_eq!(self.state(process_id), ProcessState::Completed);
    }

    pub fn slashed_validators(&self) -> Vec<Address> {
        self.protocol
            .events()
            .iter()
            .filter_map(|r| match &r.event {
                ProtocolEvent::Slashed { validator, .. } => Some(*validator),
                _ => None,
            })
            .collect()
    }
}
