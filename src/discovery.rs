//! Modular device discovery.
//!
//! Scans serial ports, asks each responder for its identity, and indexes the
//! resulting clients by name, form factor and serial number. A rig can have
//! several boards with the same firmware name; the form factor and serial
//! number tell them apart.
//!
//! Do not rescan while sampling: opening a port toggles DTR on most USB
//! bridges, which resets the board.

use crate::client::ModularClient;
use crate::config::{DeviceSelector, Settings};
use crate::error::{HplcError, Result};
use crate::protocol::DeviceId;
use crate::serial;
use std::collections::BTreeMap;

type SerialIndex = BTreeMap<u32, ModularClient>;
type FormFactorIndex = BTreeMap<String, SerialIndex>;

/// Discovered modular devices, indexed name → form factor → serial number.
#[derive(Debug, Default, Clone)]
pub struct ModularClients {
    devices: BTreeMap<String, FormFactorIndex>,
}

impl ModularClients {
    /// Create an empty device set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe candidate ports and collect every device that identifies itself.
    ///
    /// Uses `settings.ports` when given, otherwise every USB serial port the
    /// OS reports. Ports that fail to open or answer are skipped.
    pub async fn discover(settings: &Settings) -> Result<Self> {
        let ports = if settings.ports.is_empty() {
            serial::list_candidate_ports()?
        } else {
            settings.ports.clone()
        };

        tracing::info!(count = ports.len(), "Detecting USB devices...");

        let mut clients = Self::new();
        for port in ports {
            match Self::probe(&port, settings).await {
                Ok(client) => {
                    clients.insert(client).await?;
                }
                Err(e) => {
                    tracing::debug!(port = %port, error = %e, "No modular device on port");
                }
            }
        }

        tracing::info!(devices = clients.len(), "Device discovery complete");
        Ok(clients)
    }

    async fn probe(port: &str, settings: &Settings) -> Result<ModularClient> {
        let client = ModularClient::open(port, settings.baud_rate, settings.timeout()).await?;
        let id = client.device_id().await?;
        tracing::info!(port = %port, device = %id, "Found modular device");
        Ok(client)
    }

    /// Add a client, keyed by the identity it reports.
    ///
    /// A later client with the same identity replaces the earlier one.
    pub async fn insert(&mut self, client: ModularClient) -> Result<DeviceId> {
        let id = client.device_id().await?;
        let previous = self
            .devices
            .entry(id.name.clone())
            .or_default()
            .entry(id.form_factor.clone())
            .or_default()
            .insert(id.serial_number, client);
        if let Some(previous) = previous {
            tracing::warn!(
                device = %id,
                port = %previous.port_name(),
                "Duplicate modular device identity, replacing earlier port"
            );
        }
        Ok(id)
    }

    /// Whether any device with this firmware name was found.
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Look up a device by its full identity.
    pub fn get(&self, name: &str, form_factor: &str, serial_number: u32) -> Result<&ModularClient> {
        self.devices
            .get(name)
            .and_then(|by_form| by_form.get(form_factor))
            .and_then(|by_serial| by_serial.get(&serial_number))
            .ok_or_else(|| HplcError::DeviceNotConnected(name.to_string()))
    }

    /// Look up the device a selector points at.
    pub fn select(&self, selector: &DeviceSelector) -> Result<ModularClient> {
        self.get(&selector.name, &selector.form_factor, selector.serial_number)
            .cloned()
    }

    /// Number of devices across all names.
    pub fn len(&self) -> usize {
        self.devices
            .values()
            .flat_map(|by_form| by_form.values())
            .map(|by_serial| by_serial.len())
            .sum()
    }

    /// Whether no devices were found.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over `(name, form_factor, serial_number, client)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u32, &ModularClient)> {
        self.devices.iter().flat_map(|(name, by_form)| {
            by_form.iter().flat_map(move |(form, by_serial)| {
                by_serial
                    .iter()
                    .map(move |(serial, client)| (name.as_str(), form.as_str(), *serial, client))
            })
        })
    }
}
