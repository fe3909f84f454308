// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bridge configuration shared by the device and the panel.

use std::time::Duration;

use crate::com::LaneConfig;
use crate::names;
use crate::wire;

/// Every tunable of a bridge. Both sides must use equal values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub channel_name: String,
    /// Signal created by the device.
    pub device_to_panel: String,
    /// Signal created by the panel.
    pub panel_to_device: String,
    /// Bound of every signal wait, on both sides.
    pub wait_timeout: Duration,
    pub event_lane: LaneConfig,
    pub realtime_lane: LaneConfig,
    /// Run the panel worker with real-time scheduling.
    pub realtime_worker: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_name: names::DEFAULT_CHANNEL_NAME.to_owned(),
            device_to_panel: names::DEVICE_TO_PANEL_SIGNAL.to_owned(),
            panel_to_device: names::PANEL_TO_DEVICE_SIGNAL.to_owned(),
            wait_timeout: Duration::from_millis(100),
            event_lane: LaneConfig::with_depth(8, 64),
            realtime_lane: LaneConfig::with_depth(
                wire::channel_response_size(wire::MAX_BUFFER_FRAMES),
                2,
            ),
            realtime_worker: false,
        }
    }
}

impl BridgeConfig {
    /// Lane table in channel order.
    pub fn lanes(&self) -> [LaneConfig; 2] {
        [self.event_lane, self.realtime_lane]
    }

    /// Same configuration with every shared resource name suffixed by `ns`.
    pub fn namespaced(&self, ns: &str) -> Self {
        Self {
            channel_name: format!("{}_{ns}", self.channel_name),
            device_to_panel: format!("{}_{ns}", self.device_to_panel),
            panel_to_device: format!("{}_{ns}", self.panel_to_device),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::{EVENT_LANE, REALTIME_LANE};

    #[test]
    fn realtime_lane_fits_a_full_block() {
        let cfg = BridgeConfig::default();
        assert!(cfg.realtime_lane.max_message >= wire::channel_response_size(wire::MAX_BUFFER_FRAMES));
        assert!(cfg.realtime_lane.capacity >= 2 * cfg.realtime_lane.max_message);
        assert_eq!(cfg.lanes()[EVENT_LANE], cfg.event_lane);
        assert_eq!(cfg.lanes()[REALTIME_LANE], cfg.realtime_lane);
    }

    #[test]
    fn namespaced_renames_every_resource() {
        let base = BridgeConfig {
            wait_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let ns = base.namespaced("t1");
        assert_eq!(ns.channel_name, "TRKB_t1");
        assert!(ns.device_to_panel.ends_with("_t1"));
        assert!(ns.panel_to_device.ends_with("_t1"));
        assert_eq!(ns.wait_timeout, Duration::from_millis(20));
        assert_eq!(ns.realtime_lane, base.realtime_lane);
    }
}
