use tracing::{debug, trace, warn};

use crate::att::HandleValue;

use super::Client;

impl Client {
    /// Handles an unsolicited notification or indication PDU. The cached value
    /// of the matching characteristic is updated and the new value is sent to
    /// every watcher of its service in registration order. Indications are
    /// confirmed before the value is delivered.
    pub fn handle_pdu(&mut self, pdu: &[u8]) {
        let Some(hv) = HandleValue::parse(pdu) else {
            return debug!("Malformed notification/indication PDU: {pdu:02X?}");
        };
        let Some(lease) = self.conn.lease().filter(|l| l.is_listening()) else {
            return trace!("Not listening, dropping {}", hv.op);
        };
        let found = self.svcs.iter_mut().find_map(|s| {
            let i = s.chars.iter().position(|c| c.hdl == hv.hdl)?;
            Some((s, i))
        });
        let Some((svc, i)) = found else {
            // Unknown indications are not confirmed, which stalls the server's
            // bearer until its transaction timeout.
            let what = if hv.is_ind() { "unconfirmed" } else { "dropped" };
            return debug!("Attribute handle {} not found ({what})", hv.hdl);
        };
        if hv.is_ind() {
            if let Err(e) = lease.confirm() {
                warn!("Failed to confirm indication: {e}");
            }
        }
        let chr = &mut svc.chars[i];
        chr.value = Some(hv.val.to_vec());
        for w in &svc.watchers {
            self.env.ipc.value_changed(&w.name, &w.path, &chr.path, hv.val);
        }
    }
}
