//! Local-test PDU codec.
//!
//! The daemon speaks bincode-framed PDUs on its injection socket so
//! the whole pipeline can be exercised without a radio. A WAP binary
//! codec plugs in through the same [`PduCodec`] trait without any
//! other change.

use std::io::Write;

use chrono::{DateTime, Utc};

use nuntium_types::adapters::{DecodeLog, PduCodec};
use nuntium_types::pdu::{MNotificationInd, MNotifyRespInd, MRetrieveConf, MSendConf, MSendReq};
use nuntium_types::{MessageUuid, NuntiumError, Result};

/// Serde-based codec for locally injected PDUs.
pub struct LocalCodec;

impl PduCodec for LocalCodec {
    fn decode_notification(
        &self,
        data: &[u8],
        received: DateTime<Utc>,
    ) -> (Result<MNotificationInd>, DecodeLog) {
        match bincode::deserialize::<MNotificationInd>(data) {
            Ok(mut notification) => {
                // The transaction UUID is minted locally; whatever the
                // sender put on the wire is not trusted.
                notification.uuid = MessageUuid::random();
                notification.received = received;
                (Ok(notification), DecodeLog::default())
            }
            Err(e) => (
                Err(NuntiumError::Decode {
                    reason: format!("m-notification.ind envelope: {e}"),
                }),
                DecodeLog(format!("bincode: {e}")),
            ),
        }
    }

    fn decode_retrieve_conf(
        &self,
        data: &[u8],
        uuid: MessageUuid,
    ) -> (Result<MRetrieveConf>, DecodeLog) {
        match bincode::deserialize::<MRetrieveConf>(data) {
            Ok(mut retrieve_conf) => {
                retrieve_conf.uuid = uuid;
                (Ok(retrieve_conf), DecodeLog::default())
            }
            Err(e) => (
                Err(NuntiumError::Decode {
                    reason: format!("m-retrieve.conf envelope: {e}"),
                }),
                DecodeLog(format!("bincode: {e}")),
            ),
        }
    }

    fn decode_send_conf(&self, data: &[u8]) -> (Result<MSendConf>, DecodeLog) {
        match bincode::deserialize::<MSendConf>(data) {
            Ok(send_conf) => (Ok(send_conf), DecodeLog::default()),
            Err(e) => (
                Err(NuntiumError::Decode {
                    reason: format!("m-send.conf envelope: {e}"),
                }),
                DecodeLog(format!("bincode: {e}")),
            ),
        }
    }

    fn encode_notify_resp(&self, resp: &MNotifyRespInd, sink: &mut dyn Write) -> Result<()> {
        bincode::serialize_into(sink, resp).map_err(|e| NuntiumError::Encode {
            reason: format!("m-notifyresp.ind envelope: {e}"),
        })
    }

    fn encode_send_req(&self, req: &MSendReq, sink: &mut dyn Write) -> Result<()> {
        bincode::serialize_into(sink, req).map_err(|e| NuntiumError::Encode {
            reason: format!("m-send.req envelope: {e}"),
        })
    }
}
