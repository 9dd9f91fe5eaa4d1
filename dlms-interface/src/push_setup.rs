//! Push Setup interface class (Class ID: 40)
//!
//! The Push Setup interface class configures push operations where
//! the meter initiates data transfer to the client (push mode).
//!
//! # Attributes
//!
//! - Attribute 1: logical_name (OBIS code) - The logical name of the object
//! - Attribute 2: push_object_list - List of objects to push
//! - Attribute 3: send_destination_and_method - Destination address and method
//! - Attribute 4: communication_window - Time windows in which pushing is allowed
//! - Attribute 5: randomisation_start_interval - Upper bound of the random delay before the first attempt, in seconds
//! - Attribute 6: number_of_retries - Extra attempts after a failed one
//! - Attribute 7: repetition_delay - Seconds between attempts
//!
//! # Methods
//!
//! - Method 1: push - Collect the push object values and send them
//!
//! # Delivery
//!
//! The actual send goes through a [`PushTransport`]. A push outside every
//! configured communication window fails with
//! [`DlmsError::OutsideCommunicationWindow`]; a failing transport is retried
//! `number_of_retries` times before the last error is returned.

use crate::object::{AttributeAccess, CosemObject, ObjectSchema};
use crate::profile_generic::{read_values, CaptureObject};
use crate::registry::{self, ObjectRegistry};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;

/// Push object definitions share the capture object layout
pub type PushObject = CaptureObject;

pub const DEFAULT_NUMBER_OF_RETRIES: u8 = 3;
pub const DEFAULT_REPETITION_DELAY: u16 = 60;

/// Transport service of the push destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportService {
    #[default]
    Tcp = 0,
    Udp = 1,
    Ftp = 2,
    Smtp = 3,
    Sms = 4,
    Hdlc = 5,
    MBus = 6,
    ZigBee = 7,
}

impl TransportService {
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(Self::Tcp),
            1 => Ok(Self::Udp),
            2 => Ok(Self::Ftp),
            3 => Ok(Self::Smtp),
            4 => Ok(Self::Sms),
            5 => Ok(Self::Hdlc),
            6 => Ok(Self::MBus),
            7 => Ok(Self::ZigBee),
            _ => Err(DlmsError::RangeViolation(format!("transport service {}", id))),
        }
    }
}

/// Message format of the pushed data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    CosemApdu = 0,
    CosemApduXml = 1,
    ManufacturerSpecific = 128,
}

impl MessageType {
    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(Self::CosemApdu),
            1 => Ok(Self::CosemApduXml),
            128 => Ok(Self::ManufacturerSpecific),
            _ => Err(DlmsError::RangeViolation(format!("message type {}", id))),
        }
    }
}

/// Where and how pushed data is sent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushDestination {
    pub transport: TransportService,
    pub address: String,
    pub message: MessageType,
    pub port: Option<u16>,
}

impl PushDestination {
    pub fn new(transport: TransportService, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            message: MessageType::default(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    fn to_data_object(&self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::Enumerate(self.transport as u8),
            DataObject::OctetString(self.address.as_bytes().to_vec()),
            DataObject::Enumerate(self.message as u8),
            self.port.map_or(DataObject::Null, DataObject::Unsigned16),
        ])
    }

    /// Accepts the three field form and the form with a trailing port
    fn from_data_object(value: &DataObject) -> DlmsResult<Self> {
        let fields = value.as_structure()?;
        if !(3..=4).contains(&fields.len()) {
            return Err(DlmsError::TypeMismatch(format!(
                "push destination needs 3 or 4 fields, got {}",
                fields.len()
            )));
        }
        let enumerated = |field: &DataObject| -> DlmsResult<u8> {
            u8::try_from(field.as_i64()?)
                .map_err(|_| DlmsError::RangeViolation(format!("enumeration {}", field)))
        };
        let address = String::from_utf8(fields[1].as_octet_string()?.to_vec())
            .map_err(|_| DlmsError::InvalidData("push address is not UTF-8".to_string()))?;
        let port = match fields.get(3) {
            None | Some(DataObject::Null) => None,
            Some(port) => Some(
                u16::try_from(port.as_i64()?)
                    .map_err(|_| DlmsError::RangeViolation(format!("port {}", port)))?,
            ),
        };
        Ok(Self {
            transport: TransportService::from_id(enumerated(&fields[0])?)?,
            address,
            message: MessageType::from_id(enumerated(&fields[2])?)?,
            port,
        })
    }
}

/// Period in which pushing is allowed, inclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommunicationWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl CommunicationWindow {
    /// # Errors
    ///
    /// [`DlmsError::RangeViolation`] unless `start < end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> DlmsResult<Self> {
        if start >= end {
            return Err(DlmsError::RangeViolation(format!(
                "communication window start {} is not before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn contains(&self, time: NaiveDateTime) -> bool {
        self.start <= time && time <= self.end
    }

    fn to_data_object(self) -> DataObject {
        DataObject::Structure(vec![
            DataObject::DateTime(self.start),
            DataObject::DateTime(self.end),
        ])
    }

    fn from_data_object(value: &DataObject) -> DlmsResult<Self> {
        let fields = value.as_structure_of(2)?;
        Self::new(fields[0].as_date_time()?, fields[1].as_date_time()?)
    }
}

/// Delivery of pushed data to a destination
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, destination: &PushDestination, payload: &DataObject) -> DlmsResult<()>;
}

/// Transport that only logs what would have been sent
#[derive(Debug, Default)]
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn send(&self, destination: &PushDestination, payload: &DataObject) -> DlmsResult<()> {
        log::info!(
            "Push to {:?} {} (port {:?}): {}",
            destination.transport,
            destination.address,
            destination.port,
            payload
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PushConfig {
    push_objects: Vec<PushObject>,
    destination: PushDestination,
    windows: Vec<CommunicationWindow>,
    randomisation_start_interval: u16,
    number_of_retries: u8,
    repetition_delay: u16,
}

/// Push Setup interface class (Class ID: 40)
pub struct PushSetup {
    schema: ObjectSchema,
    registry: Weak<ObjectRegistry>,
    transport: Arc<dyn PushTransport>,
    config: RwLock<PushConfig>,
}

impl PushSetup {
    pub const CLASS_ID: u16 = 40;

    /// Attribute IDs
    pub const ATTR_PUSH_OBJECT_LIST: u8 = 2;
    pub const ATTR_SEND_DESTINATION_AND_METHOD: u8 = 3;
    pub const ATTR_COMMUNICATION_WINDOW: u8 = 4;
    pub const ATTR_RANDOMISATION_START_INTERVAL: u8 = 5;
    pub const ATTR_NUMBER_OF_RETRIES: u8 = 6;
    pub const ATTR_REPETITION_DELAY: u8 = 7;

    /// Method IDs
    pub const METHOD_PUSH: u8 = 1;

    pub fn default_obis() -> ObisCode {
        ObisCode::new(0, 4, 25, 9, 0, 255)
    }

    pub fn new(
        logical_name: ObisCode,
        registry: Weak<ObjectRegistry>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let schema = ObjectSchema::new(Self::CLASS_ID, logical_name)
            .with_attribute(
                Self::ATTR_PUSH_OBJECT_LIST,
                "push_object_list",
                DataObjectType::Array,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_SEND_DESTINATION_AND_METHOD,
                "send_destination_and_method",
                DataObjectType::Structure,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_COMMUNICATION_WINDOW,
                "communication_window",
                DataObjectType::Array,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_RANDOMISATION_START_INTERVAL,
                "randomisation_start_interval",
                DataObjectType::LongUnsigned,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_NUMBER_OF_RETRIES,
                "number_of_retries",
                DataObjectType::Unsigned,
                AttributeAccess::ReadWrite,
            )
            .with_attribute(
                Self::ATTR_REPETITION_DELAY,
                "repetition_delay",
                DataObjectType::LongUnsigned,
                AttributeAccess::ReadWrite,
            )
            .with_method(Self::METHOD_PUSH, "push");
        Self {
            schema,
            registry,
            transport,
            config: RwLock::new(PushConfig {
                push_objects: Vec::new(),
                destination: PushDestination::default(),
                windows: Vec::new(),
                randomisation_start_interval: 0,
                number_of_retries: DEFAULT_NUMBER_OF_RETRIES,
                repetition_delay: DEFAULT_REPETITION_DELAY,
            }),
        }
    }

    pub async fn push_objects(&self) -> Vec<PushObject> {
        self.config.read().await.push_objects.clone()
    }

    pub async fn set_push_objects(&self, push_objects: Vec<PushObject>) {
        self.config.write().await.push_objects = push_objects;
    }

    pub async fn add_push_object(&self, push_object: PushObject) {
        self.config.write().await.push_objects.push(push_object);
    }

    pub async fn destination(&self) -> PushDestination {
        self.config.read().await.destination.clone()
    }

    pub async fn set_destination(&self, destination: PushDestination) {
        self.config.write().await.destination = destination;
    }

    /// An empty list allows pushing at any time
    pub async fn set_communication_windows(&self, windows: Vec<CommunicationWindow>) {
        self.config.write().await.windows = windows;
    }

    pub async fn randomisation_start_interval(&self) -> u16 {
        self.config.read().await.randomisation_start_interval
    }

    pub async fn set_randomisation_start_interval(&self, seconds: u16) {
        self.config.write().await.randomisation_start_interval = seconds;
    }

    pub async fn number_of_retries(&self) -> u8 {
        self.config.read().await.number_of_retries
    }

    pub async fn set_number_of_retries(&self, retries: u8) {
        self.config.write().await.number_of_retries = retries;
    }

    pub async fn repetition_delay(&self) -> u16 {
        self.config.read().await.repetition_delay
    }

    pub async fn set_repetition_delay(&self, seconds: u16) {
        self.config.write().await.repetition_delay = seconds;
    }

    pub async fn push(&self) -> DlmsResult<()> {
        self.push_at(Utc::now().naive_utc()).await
    }

    /// Run one push as if the current time were `now`
    ///
    /// # Errors
    ///
    /// - [`DlmsError::OutsideCommunicationWindow`] if windows are configured
    ///   and none contains `now`
    /// - the last transport error once every attempt has failed
    pub async fn push_at(&self, now: NaiveDateTime) -> DlmsResult<()> {
        let config = self.config.read().await.clone();

        if !config.windows.is_empty() && !config.windows.iter().any(|w| w.contains(now)) {
            log::debug!("{} push at {} outside communication windows", self.obis_code(), now);
            return Err(DlmsError::OutsideCommunicationWindow);
        }

        if config.randomisation_start_interval > 0 {
            let delay_ms = rand::thread_rng()
                .gen_range(0..u64::from(config.randomisation_start_interval) * 1000);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let registry = registry::upgrade(&self.registry)?;
        let payload = DataObject::Structure(
            read_values(&registry, &config.push_objects, self.obis_code()).await,
        );
        drop(registry);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.send(&config.destination, &payload).await {
                Ok(()) => {
                    log::info!(
                        "{} pushed {} values to {} (attempt {})",
                        self.obis_code(),
                        config.push_objects.len(),
                        config.destination.address,
                        attempt
                    );
                    return Ok(());
                }
                Err(e) if attempt > u32::from(config.number_of_retries) => {
                    log::error!(
                        "{} push to {} failed after {} attempts: {}",
                        self.obis_code(),
                        config.destination.address,
                        attempt,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("{} push attempt {} failed: {}", self.obis_code(), attempt, e);
                    tokio::time::sleep(Duration::from_secs(u64::from(config.repetition_delay)))
                        .await;
                }
            }
        }
    }
}

fn unsigned<T: TryFrom<i64>>(value: &DataObject, what: &str) -> DlmsResult<T> {
    let raw = value.as_i64()?;
    T::try_from(raw).map_err(|_| DlmsError::RangeViolation(format!("{} {} out of range", what, raw)))
}

#[async_trait]
impl CosemObject for PushSetup {
    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        let config = self.config.read().await;
        let value = match attribute_id {
            Self::ATTR_PUSH_OBJECT_LIST => DataObject::Array(
                config
                    .push_objects
                    .iter()
                    .map(|push_object| push_object.to_data_object())
                    .collect::<DlmsResult<_>>()?,
            ),
            Self::ATTR_SEND_DESTINATION_AND_METHOD => config.destination.to_data_object(),
            Self::ATTR_COMMUNICATION_WINDOW => DataObject::Array(
                config
                    .windows
                    .iter()
                    .map(|window| window.to_data_object())
                    .collect(),
            ),
            Self::ATTR_RANDOMISATION_START_INTERVAL => {
                DataObject::Unsigned16(config.randomisation_start_interval)
            }
            Self::ATTR_NUMBER_OF_RETRIES => DataObject::Unsigned8(config.number_of_retries),
            Self::ATTR_REPETITION_DELAY => DataObject::Unsigned16(config.repetition_delay),
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        };
        Ok(value)
    }

    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        match attribute_id {
            Self::ATTR_PUSH_OBJECT_LIST => {
                let push_objects = value
                    .as_array()?
                    .iter()
                    .map(PushObject::from_data_object)
                    .collect::<DlmsResult<Vec<_>>>()?;
                self.set_push_objects(push_objects).await;
            }
            Self::ATTR_SEND_DESTINATION_AND_METHOD => {
                self.set_destination(PushDestination::from_data_object(&value)?)
                    .await;
            }
            Self::ATTR_COMMUNICATION_WINDOW => {
                let windows = value
                    .as_array()?
                    .iter()
                    .map(CommunicationWindow::from_data_object)
                    .collect::<DlmsResult<Vec<_>>>()?;
                self.set_communication_windows(windows).await;
            }
            Self::ATTR_RANDOMISATION_START_INTERVAL => {
                self.set_randomisation_start_interval(unsigned(&value, "randomisation interval")?)
                    .await;
            }
            Self::ATTR_NUMBER_OF_RETRIES => {
                self.set_number_of_retries(unsigned(&value, "number of retries")?)
                    .await;
            }
            Self::ATTR_REPETITION_DELAY => {
                self.set_repetition_delay(unsigned(&value, "repetition delay")?)
                    .await;
            }
            _ => return Err(self.schema.invalid_attribute(attribute_id)),
        }
        Ok(())
    }

    async fn handle_action(
        &self,
        method_id: u8,
        _parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        match method_id {
            Self::METHOD_PUSH => {
                self.push().await?;
                Ok(None)
            }
            _ => Err(self.schema.invalid_method(method_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use chrono::NaiveDate;
    use tokio::time::Instant;

    const DEVICE_ID: ObisCode = ObisCode::new(0, 0, 96, 1, 2, 255);

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    async fn setup(transport: MockPushTransport) -> (Arc<ObjectRegistry>, PushSetup) {
        let registry = Arc::new(ObjectRegistry::new());
        registry
            .register(Arc::new(
                Data::new(
                    DEVICE_ID,
                    DataObjectType::VisibleString,
                    DataObject::VisibleString("SIM0001".to_string()),
                )
                .unwrap(),
            ))
            .await
            .unwrap();
        let push = PushSetup::new(
            PushSetup::default_obis(),
            Arc::downgrade(&registry),
            Arc::new(transport),
        );
        push.add_push_object(PushObject::new(Data::CLASS_ID, DEVICE_ID, 2))
            .await;
        push.set_destination(PushDestination::new(TransportService::Tcp, "10.0.0.1").with_port(4059))
            .await;
        (registry, push)
    }

    #[tokio::test]
    async fn test_push_setup_class_id() {
        let (_registry, push) = setup(MockPushTransport::new()).await;
        assert_eq!(push.class_id(), 40);
        assert_eq!(push.number_of_retries().await, 3);
        assert_eq!(push.repetition_delay().await, 60);
    }

    #[tokio::test]
    async fn test_push_sends_collected_values() {
        let mut transport = MockPushTransport::new();
        transport
            .expect_send()
            .withf(|destination, payload| {
                destination.port == Some(4059)
                    && *payload
                        == DataObject::Structure(vec![DataObject::VisibleString("SIM0001".to_string())])
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let (_registry, push) = setup(transport).await;
        push.push_at(at(12)).await.unwrap();
    }

    #[tokio::test]
    async fn test_push_outside_window_fails() {
        let mut transport = MockPushTransport::new();
        transport.expect_send().never();
        let (_registry, push) = setup(transport).await;
        push.set_communication_windows(vec![
            CommunicationWindow::new(at(1), at(3)).unwrap(),
            CommunicationWindow::new(at(20), at(22)).unwrap(),
        ])
        .await;

        assert_eq!(
            push.push_at(at(12)).await,
            Err(DlmsError::OutsideCommunicationWindow)
        );
    }

    #[tokio::test]
    async fn test_push_inside_any_window_succeeds() {
        let mut transport = MockPushTransport::new();
        transport.expect_send().times(1).returning(|_, _| Ok(()));
        let (_registry, push) = setup(transport).await;
        push.set_communication_windows(vec![
            CommunicationWindow::new(at(1), at(3)).unwrap(),
            CommunicationWindow::new(at(20), at(22)).unwrap(),
        ])
        .await;

        push.push_at(at(21)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_retries_then_surfaces_last_error() {
        let mut transport = MockPushTransport::new();
        transport
            .expect_send()
            .times(3)
            .returning(|_, _| Err(DlmsError::Transport("connection refused".to_string())));
        let (_registry, push) = setup(transport).await;
        push.set_number_of_retries(2).await;
        push.set_repetition_delay(30).await;

        let started = Instant::now();
        assert_eq!(
            push.push_at(at(12)).await,
            Err(DlmsError::Transport("connection refused".to_string()))
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_recovers_on_retry() {
        let mut transport = MockPushTransport::new();
        let mut sequence = mockall::Sequence::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Err(DlmsError::Transport("timeout".to_string())));
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        let (_registry, push) = setup(transport).await;
        push.set_randomisation_start_interval(10).await;

        let started = Instant::now();
        push.push_at(at(12)).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(70));
    }

    #[tokio::test]
    async fn test_configuration_attributes() {
        let (_registry, push) = setup(MockPushTransport::new()).await;

        push.set_attribute(
            3,
            DataObject::Structure(vec![
                DataObject::Enumerate(1),
                DataObject::OctetString(b"hes.example".to_vec()),
                DataObject::Enumerate(0),
            ]),
        )
        .await
        .unwrap();
        let destination = push.destination().await;
        assert_eq!(destination.transport, TransportService::Udp);
        assert_eq!(destination.port, None);

        let window = DataObject::Structure(vec![DataObject::DateTime(at(5)), DataObject::DateTime(at(6))]);
        push.set_attribute(4, DataObject::Array(vec![window.clone()])).await.unwrap();
        assert_eq!(push.get_attribute(4).await.unwrap(), DataObject::Array(vec![window]));

        let inverted = DataObject::Structure(vec![DataObject::DateTime(at(6)), DataObject::DateTime(at(5))]);
        assert!(matches!(
            push.set_attribute(4, DataObject::Array(vec![inverted])).await,
            Err(DlmsError::RangeViolation(_))
        ));

        assert!(matches!(
            push.set_attribute(6, DataObject::Unsigned16(300)).await,
            Err(DlmsError::RangeViolation(_))
        ));
        push.set_attribute(6, DataObject::Unsigned8(5)).await.unwrap();
        assert_eq!(push.number_of_retries().await, 5);
    }
}
