//! DLMS/COSEM server implementation
//!
//! The server owns the object registry of one simulated logical device
//! together with the managers that guard it, and offers the three COSEM
//! services (GET, SET, ACTION) on behalf of an associated session.

use crate::objects::StandardObjects;
use chrono::{DateTime, Utc};
use dlms_application::{
    ApduHandler, AssociationHandle, AssociationLimits, AssociationService, SessionRequest,
};
use dlms_core::{DataObject, DlmsError, DlmsResult, ObisCode};
use dlms_interface::{AssociationLn, CosemObject, LogPushTransport, ObjectRegistry, PushTransport};
use dlms_security::{
    AccessControlManager, AccessLevel, AccessRight, KeyManager, SECURITY_LOG_TARGET,
    SecurityAuditLog,
};
use dlms_session::{HdlcConfig, HdlcFrame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Value of the logical device name object (0.0.42.0.0.255)
    pub logical_device_name: String,
    /// Server system title published by the security setup
    pub system_title: [u8; 8],
    /// Security events kept in the audit log
    pub max_audit_events: usize,
    /// Block load integration period in seconds
    pub block_load_period: u32,
    /// Destination address of the push setup
    pub push_address: String,
    pub limits: AssociationLimits,
    /// HDLC parameters for new connections
    pub hdlc: HdlcConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            logical_device_name: "SIM0000000000001".to_string(),
            system_title: *b"SIM00001",
            max_audit_events: 1000,
            block_load_period: 900,
            push_address: "127.0.0.1:4059".to_string(),
            limits: AssociationLimits::default(),
            hdlc: HdlcConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_logical_device_name(mut self, name: impl Into<String>) -> Self {
        self.logical_device_name = name.into();
        self
    }

    pub fn with_system_title(mut self, system_title: [u8; 8]) -> Self {
        self.system_title = system_title;
        self
    }

    pub fn with_max_audit_events(mut self, max: usize) -> Self {
        self.max_audit_events = max;
        self
    }

    pub fn with_block_load_period(mut self, seconds: u32) -> Self {
        self.block_load_period = seconds;
        self
    }

    pub fn with_push_address(mut self, address: impl Into<String>) -> Self {
        self.push_address = address.into();
        self
    }

    pub fn with_limits(mut self, limits: AssociationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_hdlc(mut self, hdlc: HdlcConfig) -> Self {
        self.hdlc = hdlc;
        self
    }
}

/// DLMS/COSEM server
///
/// Main server implementation that manages:
/// - the COSEM object registry and the standard object set
/// - associations and their connections
/// - access rights, key material and the security audit log
/// - request handling (GET, SET, ACTION)
///
/// Every request names a session. The session must be associated over a
/// connected HDLC link, the object is resolved by class id and logical name,
/// and the client's rights are checked (`Read` for GET, `Write` for SET,
/// `Write` plus the method bit for ACTION) before the object sees the request.
///
/// # Usage Example
/// ```rust,no_run
/// use dlms_application::SessionRequest;
/// use dlms_server::{DlmsServer, ServerConfig};
/// use dlms_interface::Clock;
///
/// # async fn demo(snrm_from_peer: &[u8]) -> dlms_core::DlmsResult<()> {
/// let server = DlmsServer::new(ServerConfig::default()).await?;
/// server.grant_all(16).await?;
///
/// let handle = server.open_association(SessionRequest::new(16)).await?;
/// let Some(mut to_peer) = server.take_outbound(handle.connection_id).await else {
///     return Ok(());
/// };
///
/// // the peer's SNRM brings the link up and completes the association
/// server.receive(handle.connection_id, snrm_from_peer).await?;
/// let ua = to_peer.recv().await;
///
/// let time = server
///     .get(handle.session_id, Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct DlmsServer {
    config: ServerConfig,
    registry: Arc<ObjectRegistry>,
    audit: Arc<SecurityAuditLog>,
    access: AccessControlManager,
    keys: Arc<KeyManager>,
    associations: Arc<AssociationService>,
    objects: StandardObjects,
}

impl DlmsServer {
    /// Create a server whose push setup only logs what it would send
    pub async fn new(config: ServerConfig) -> DlmsResult<Self> {
        Self::with_push_transport(config, Arc::new(LogPushTransport)).await
    }

    /// Create a server and install the standard object set
    pub async fn with_push_transport(
        config: ServerConfig,
        push_transport: Arc<dyn PushTransport>,
    ) -> DlmsResult<Self> {
        let audit = Arc::new(SecurityAuditLog::new(config.max_audit_events));
        let keys = Arc::new(KeyManager::new(audit.clone()));
        let registry = Arc::new(ObjectRegistry::new());
        let objects = StandardObjects::install(
            &registry,
            &config,
            keys.clone(),
            audit.clone(),
            push_transport,
        )
        .await?;

        Ok(Self {
            access: AccessControlManager::in_memory(audit.clone()),
            associations: AssociationService::with_registry(config.limits.clone(), registry.clone()),
            config,
            registry,
            audit,
            keys,
            objects,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn objects(&self) -> &StandardObjects {
        &self.objects
    }

    pub fn access_control(&self) -> &AccessControlManager {
        &self.access
    }

    pub fn audit_log(&self) -> &Arc<SecurityAuditLog> {
        &self.audit
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn associations(&self) -> &Arc<AssociationService> {
        &self.associations
    }

    /// Grant `client_id` unrestricted read-write rights on every registered
    /// object and on its own Association LN object
    pub async fn grant_all(&self, client_id: u16) -> DlmsResult<()> {
        let mut logical_names = self.registry.logical_names().await;
        logical_names.extend(AssociationLn::obis_for_client(client_id));
        for logical_name in logical_names {
            self.access
                .grant_access(AccessRight::unrestricted(
                    client_id,
                    logical_name,
                    AccessLevel::ReadWrite,
                ))
                .await?;
        }
        Ok(())
    }

    /// Accept an association request.
    ///
    /// The session gets a connection configured with the server's HDLC
    /// parameters. It is served once the peer connects that link; feed the
    /// peer's frames in with [`DlmsServer::receive`].
    ///
    /// # Arguments
    ///
    /// * `request` - Client SAP and negotiated security
    ///
    /// # Returns
    ///
    /// The ids of the new session and of its connection.
    pub async fn open_association(&self, request: SessionRequest) -> DlmsResult<AssociationHandle> {
        self.associations
            .handle_association_request(request, self.config.hdlc.clone())
            .await
    }

    /// Feed bytes read from the transport into a connection's HDLC link
    pub async fn receive(&self, connection_id: u64, raw: &[u8]) -> DlmsResult<()> {
        self.associations.receive_bytes(connection_id, raw).await
    }

    /// Frames the connection's link wants written to the transport. Only the
    /// first call for a connection returns the receiver.
    pub async fn take_outbound(&self, connection_id: u64) -> Option<mpsc::UnboundedReceiver<HdlcFrame>> {
        self.associations.connections().take_outbound(connection_id).await
    }

    /// Route the APDUs received on associated links to `handler`; its replies
    /// go back over the same link
    pub async fn set_apdu_handler(&self, handler: Arc<dyn ApduHandler>) {
        self.associations.set_apdu_handler(handler).await;
    }

    pub async fn release_association(&self, session_id: u64) -> DlmsResult<()> {
        self.associations.release_association(session_id).await
    }

    /// GET service
    ///
    /// # Arguments
    ///
    /// * `session_id` - Session the request arrived on
    /// * `class_id` / `logical_name` - Target object, both must match
    /// * `attribute_id` - Attribute to read
    ///
    /// # Errors
    ///
    /// - [`DlmsError::InvalidState`] if the session is not associated or its
    ///   link is not connected
    /// - [`DlmsError::ObjectNotFound`] / [`DlmsError::ClassMismatch`] if the
    ///   object cannot be resolved
    /// - [`DlmsError::AccessDenied`] if the client lacks read rights
    /// - any error of the object's attribute handler
    pub async fn get(
        &self,
        session_id: u64,
        class_id: u16,
        logical_name: ObisCode,
        attribute_id: u8,
    ) -> DlmsResult<DataObject> {
        let object = self
            .authorize(
                session_id,
                class_id,
                logical_name,
                AccessLevel::Read,
                Some(attribute_id),
                None,
            )
            .await?;
        object.get_attribute(attribute_id).await
    }

    /// SET service, requires `Write` rights on the attribute
    pub async fn set(
        &self,
        session_id: u64,
        class_id: u16,
        logical_name: ObisCode,
        attribute_id: u8,
        value: DataObject,
    ) -> DlmsResult<()> {
        let object = self
            .authorize(
                session_id,
                class_id,
                logical_name,
                AccessLevel::Write,
                Some(attribute_id),
                None,
            )
            .await?;
        object.set_attribute(attribute_id, value).await
    }

    /// ACTION service, requires `Write` rights and the method's bit
    pub async fn action(
        &self,
        session_id: u64,
        class_id: u16,
        logical_name: ObisCode,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        let object = self
            .authorize(
                session_id,
                class_id,
                logical_name,
                AccessLevel::Write,
                None,
                Some(method_id),
            )
            .await?;
        object.invoke_method(method_id, parameters).await
    }

    /// Periodic housekeeping: pending calendar activation and idle sessions
    pub async fn tick_at(&self, now: DateTime<Utc>) -> DlmsResult<()> {
        if self
            .objects
            .calendar
            .check_activation(now.naive_utc())
            .await?
        {
            log::info!("Passive calendar activated at {}", now);
        }
        self.associations.cleanup_inactive(now).await;
        Ok(())
    }

    async fn authorize(
        &self,
        session_id: u64,
        class_id: u16,
        logical_name: ObisCode,
        required: AccessLevel,
        attribute_id: Option<u8>,
        method_id: Option<u8>,
    ) -> DlmsResult<Arc<dyn CosemObject>> {
        let session = self.associations.serving_session(session_id).await?;
        let object = self.registry.resolve(class_id, &logical_name).await?;

        let granted = self
            .access
            .check_access(
                session.client_id,
                logical_name,
                required,
                attribute_id,
                method_id,
            )
            .await?;
        if !granted {
            log::warn!(
                target: SECURITY_LOG_TARGET,
                "Session {} (client {}) denied {} access to {}",
                session_id,
                session.client_id,
                required,
                logical_name
            );
            return Err(DlmsError::AccessDenied(format!(
                "client {} lacks {} access to {}",
                session.client_id, required, logical_name
            )));
        }

        // the session may have ended in the meantime
        let _ = self.associations.associations().touch(session_id).await;
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{self, SCRIPT_CAPTURE_BILLING};
    use dlms_interface::{
        BillingProfile, BlockLoadProfile, Clock, Data, ProfileGeneric, PushDestination, PushSetup,
        Register, ScriptTable,
    };
    use bytes::Bytes;
    use dlms_interface::AssociationStatus;
    use dlms_security::SecurityEventKind;
    use dlms_session::FrameType;
    use mockall::mock;

    mock! {
        Transport {}

        #[async_trait::async_trait]
        impl PushTransport for Transport {
            async fn send(&self, destination: &PushDestination, payload: &DataObject) -> DlmsResult<()>;
        }
    }

    mock! {
        Handler {}

        #[async_trait::async_trait]
        impl ApduHandler for Handler {
            async fn handle_apdu(&self, session_id: u64, apdu: Bytes) -> DlmsResult<Option<Bytes>>;
        }
    }

    const CLIENT: u16 = 16;

    /// Frame as the client would send it
    fn from_peer(server: &DlmsServer, frame_type: FrameType) -> Bytes {
        let hdlc = &server.config().hdlc;
        HdlcFrame::unnumbered(frame_type, hdlc.local_address, hdlc.remote_address).encode()
    }

    /// Open an association and let the peer bring its link up
    async fn associate(server: &DlmsServer) -> AssociationHandle {
        let handle = server
            .open_association(SessionRequest::new(CLIENT))
            .await
            .unwrap();
        server
            .receive(handle.connection_id, &from_peer(server, FrameType::SetNormalResponseMode))
            .await
            .unwrap();
        handle
    }

    async fn associated_server() -> (DlmsServer, u64) {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        server.grant_all(CLIENT).await.unwrap();
        let handle = associate(&server).await;
        (server, handle.session_id)
    }

    #[tokio::test]
    async fn test_standard_object_set() {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        let registry = server.registry();

        for (class_id, obis) in [
            (Clock::CLASS_ID, Clock::default_obis()),
            (Data::CLASS_ID, objects::logical_device_name_obis()),
            (Register::CLASS_ID, objects::active_energy_import_obis()),
            (Register::CLASS_ID, objects::voltage_obis()),
            (ProfileGeneric::CLASS_ID, BillingProfile::default_obis()),
            (ProfileGeneric::CLASS_ID, BlockLoadProfile::default_obis()),
            (PushSetup::CLASS_ID, PushSetup::default_obis()),
            (ScriptTable::CLASS_ID, ScriptTable::default_obis()),
        ] {
            assert!(registry.resolve(class_id, &obis).await.is_ok(), "{}", obis);
        }
        assert_eq!(
            server.objects().block_load.profile().profile_entries().await,
            2880
        );
    }

    #[tokio::test]
    async fn test_logical_name_is_read_only_everywhere() {
        let (server, session_id) = associated_server().await;

        for logical_name in server.registry().logical_names().await {
            let object = server.registry().get(&logical_name).await.unwrap();
            let value = DataObject::OctetString(logical_name.to_bytes().to_vec());
            let result = server
                .set(session_id, object.class_id(), logical_name, 1, value)
                .await;
            assert_eq!(
                result,
                Err(DlmsError::ReadOnlyViolation(1)),
                "class {} object {}",
                object.class_id(),
                logical_name
            );
        }
    }

    #[tokio::test]
    async fn test_get_returns_logical_device_name() {
        let (server, session_id) = associated_server().await;
        let value = server
            .get(
                session_id,
                Data::CLASS_ID,
                objects::logical_device_name_obis(),
                Data::ATTR_VALUE,
            )
            .await
            .unwrap();
        assert_eq!(value, DataObject::OctetString(b"SIM0000000000001".to_vec()));
    }

    #[tokio::test]
    async fn test_requests_need_an_associated_session() {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        server.grant_all(CLIENT).await.unwrap();

        let result = server
            .get(99, Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME)
            .await;
        assert!(matches!(result, Err(DlmsError::InvalidState(_))));

        let handle = server
            .associations()
            .handle_association_request(SessionRequest::new(CLIENT), HdlcConfig::default())
            .await
            .unwrap();
        let result = server
            .get(handle.session_id, Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME)
            .await;
        assert!(matches!(result, Err(DlmsError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_service_follows_hdlc_link() {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        server.grant_all(CLIENT).await.unwrap();
        let handle = server
            .open_association(SessionRequest::new(CLIENT))
            .await
            .unwrap();
        let mut to_peer = server.take_outbound(handle.connection_id).await.unwrap();
        let read_time = {
            let server = &server;
            let session_id = handle.session_id;
            move || server.get(session_id, Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME)
        };

        // no SNRM yet
        assert!(matches!(read_time().await, Err(DlmsError::InvalidState(_))));

        server
            .receive(handle.connection_id, &from_peer(&server, FrameType::SetNormalResponseMode))
            .await
            .unwrap();
        assert_eq!(to_peer.recv().await.unwrap().frame_type, FrameType::UnnumberedAcknowledge);
        assert!(read_time().await.is_ok());

        server
            .receive(handle.connection_id, &from_peer(&server, FrameType::Disconnect))
            .await
            .unwrap();
        assert_eq!(to_peer.recv().await.unwrap().frame_type, FrameType::UnnumberedAcknowledge);
        assert!(matches!(read_time().await, Err(DlmsError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_received_apdu_reaches_handler() {
        let (server, session_id) = associated_server().await;
        let connection_id = server.associations().session_info(session_id).await.connections[0].connection_id;
        let mut to_peer = server.take_outbound(connection_id).await.unwrap();
        // UA of the SNRM sent while associating
        assert_eq!(to_peer.recv().await.unwrap().frame_type, FrameType::UnnumberedAcknowledge);

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let mut handler = MockHandler::new();
        handler
            .expect_handle_apdu()
            .withf(move |session, apdu| *session == session_id && *apdu == Bytes::from_static(b"\xC0\x01"))
            .times(1)
            .returning(move |_, apdu| {
                let _ = seen_tx.send(apdu);
                Ok(None)
            });
        server.set_apdu_handler(Arc::new(handler)).await;

        let hdlc = &server.config().hdlc;
        let request = HdlcFrame::information(
            hdlc.local_address,
            hdlc.remote_address,
            0,
            0,
            Bytes::from_static(b"\xC0\x01"),
        );
        server.receive(connection_id, &request.encode()).await.unwrap();
        assert_eq!(to_peer.recv().await.unwrap().frame_type, FrameType::ReceiveReady);

        assert_eq!(seen.recv().await, Some(Bytes::from_static(b"\xC0\x01")));
        // no reply, nothing more goes out
        assert!(to_peer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_association_object_lists_registry() {
        let (server, session_id) = associated_server().await;
        let obis = AssociationLn::obis_for_client(CLIENT).unwrap();

        let list = server
            .get(session_id, AssociationLn::CLASS_ID, obis, AssociationLn::ATTR_OBJECT_LIST)
            .await
            .unwrap();
        let listed: Vec<DataObject> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry.as_structure_of(3).unwrap()[2].clone())
            .collect();
        let registered: Vec<DataObject> = server
            .registry()
            .logical_names()
            .await
            .iter()
            .map(|name| DataObject::OctetString(name.to_bytes().to_vec()))
            .collect();
        assert_eq!(listed, registered);
        assert!(listed.contains(&DataObject::OctetString(obis.to_bytes().to_vec())));

        let status = server
            .get(session_id, AssociationLn::CLASS_ID, obis, AssociationLn::ATTR_ASSOCIATION_STATUS)
            .await
            .unwrap();
        assert_eq!(status, DataObject::Enumerate(AssociationStatus::Associated as u8));

        server.release_association(session_id).await.unwrap();
        assert!(server.registry().get(&obis).await.is_none());
    }

    #[tokio::test]
    async fn test_access_denied_without_rights() {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        let handle = associate(&server).await;

        let result = server
            .get(handle.session_id, Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME)
            .await;
        assert!(matches!(result, Err(DlmsError::AccessDenied(_))));
        assert_eq!(server.audit_log().count(SecurityEventKind::AccessDenied).await, 1);
    }

    #[tokio::test]
    async fn test_read_only_rights_block_set() {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        server
            .access_control()
            .grant_access(AccessRight::unrestricted(
                CLIENT,
                objects::voltage_obis(),
                AccessLevel::Read,
            ))
            .await
            .unwrap();
        let handle = associate(&server).await;

        assert!(server
            .get(handle.session_id, Register::CLASS_ID, objects::voltage_obis(), Register::ATTR_VALUE)
            .await
            .is_ok());
        let result = server
            .set(
                handle.session_id,
                Register::CLASS_ID,
                objects::voltage_obis(),
                Register::ATTR_VALUE,
                DataObject::Unsigned16(2300),
            )
            .await;
        assert!(matches!(result, Err(DlmsError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_action_needs_method_bit() {
        let server = DlmsServer::new(ServerConfig::default()).await.unwrap();
        let obis = BillingProfile::default_obis();
        server
            .access_control()
            .grant_access(
                AccessRight::new(CLIENT, obis, AccessLevel::ReadWrite)
                    .with_method(ProfileGeneric::METHOD_RESET),
            )
            .await
            .unwrap();
        let handle = associate(&server).await;

        assert!(server
            .action(handle.session_id, ProfileGeneric::CLASS_ID, obis, ProfileGeneric::METHOD_RESET, None)
            .await
            .is_ok());
        let result = server
            .action(handle.session_id, ProfileGeneric::CLASS_ID, obis, ProfileGeneric::METHOD_CAPTURE, None)
            .await;
        assert!(matches!(result, Err(DlmsError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_class_mismatch() {
        let (server, session_id) = associated_server().await;
        let result = server
            .get(session_id, Register::CLASS_ID, Clock::default_obis(), 2)
            .await;
        assert!(matches!(result, Err(DlmsError::ClassMismatch { .. })));
    }

    #[tokio::test]
    async fn test_script_captures_billing_profile() {
        let (server, session_id) = associated_server().await;
        server
            .action(
                session_id,
                ScriptTable::CLASS_ID,
                ScriptTable::default_obis(),
                ScriptTable::METHOD_EXECUTE,
                Some(DataObject::Unsigned16(SCRIPT_CAPTURE_BILLING)),
            )
            .await
            .unwrap();

        let entries = server
            .get(
                session_id,
                ProfileGeneric::CLASS_ID,
                BillingProfile::default_obis(),
                ProfileGeneric::ATTR_ENTRIES_IN_USE,
            )
            .await
            .unwrap();
        assert_eq!(entries.as_i64().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_push_goes_through_transport() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|destination, payload| {
                destination.address == "127.0.0.1:4059"
                    && payload.as_structure().map(|values| values.len()).ok() == Some(3)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let server = DlmsServer::with_push_transport(ServerConfig::default(), Arc::new(transport))
            .await
            .unwrap();
        server.objects().push.set_randomisation_start_interval(0).await;

        server.objects().push.push().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_activates_calendar_and_ends_idle_sessions() {
        let limits =
            AssociationLimits::default().with_session_timeout(std::time::Duration::from_secs(60));
        let server = DlmsServer::new(ServerConfig::default().with_limits(limits))
            .await
            .unwrap();
        let handle = associate(&server).await;
        let now = Utc::now();
        let calendar = &server.objects().calendar;
        calendar
            .set_activation_time(Some(now.naive_utc() - chrono::Duration::minutes(1)))
            .await;

        server.tick_at(now).await.unwrap();
        assert_eq!(calendar.activation_time().await, None);
        let sessions = server.associations().associations();
        assert!(sessions.session(handle.session_id).await.is_some());

        server.tick_at(now + chrono::Duration::minutes(2)).await.unwrap();
        assert!(sessions.session(handle.session_id).await.is_none());
        let obis = AssociationLn::obis_for_client(CLIENT).unwrap();
        assert!(server.registry().get(&obis).await.is_none());
    }

    #[tokio::test]
    async fn test_release_ends_access() {
        let (server, session_id) = associated_server().await;
        server.release_association(session_id).await.unwrap();
        let result = server
            .get(session_id, Clock::CLASS_ID, Clock::default_obis(), Clock::ATTR_TIME)
            .await;
        assert!(matches!(result, Err(DlmsError::InvalidState(_))));
    }
}
