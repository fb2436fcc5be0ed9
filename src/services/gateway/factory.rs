use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    aamarpay::AamarPayGateway, bkash::BkashGateway, nagad::NagadGateway, rocket::RocketGateway,
    PaymentGateway, TokenCache,
};
use crate::config::GatewaysConfig;
use crate::error::GatewayError;
use crate::models::common::PaymentMethod;

/// Maps payment-method codes to gateway clients.
#[derive(Clone, Default)]
pub struct GatewayFactory {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayFactory {
    pub fn from_config(config: &GatewaysConfig, client: Client, tokens: TokenCache) -> Self {
        Self::empty()
            .with_gateway(Arc::new(BkashGateway::new(client.clone(), config.bkash.clone(), tokens)))
            .with_gateway(Arc::new(NagadGateway::new(client.clone(), config.nagad.clone())))
            .with_gateway(Arc::new(RocketGateway::new(client.clone(), config.rocket.clone())))
            .with_gateway(Arc::new(AamarPayGateway::new(client, config.aamarpay.clone())))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers `gateway` under the method it reports, replacing any previous one.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn get_gateway(&self, payment_method: &str) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        let method: PaymentMethod = payment_method.parse()?;
        self.gateway_for(method)
    }

    pub fn gateway_for(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&method)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedMethod(method.to_string()))
    }

    pub fn supports(&self, method: PaymentMethod) -> bool {
        self.gateways.contains_key(&method)
    }

    /// Registered methods in display order.
    pub fn supported_methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|method| self.supports(*method))
            .collect()
    }
}
