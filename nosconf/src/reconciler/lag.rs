//! Link aggregation groups.
//!
//! A LAG lives in three places on the device: the interface itself (type,
//! aggregation config and switched VLANs), the LACP subtree when the group
//! negotiates with LACP, and the `aggregate-id` leaf of every member
//! ethernet interface.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::names::encode_key;
use crate::params::{
    get_choice, get_int_in, get_int_list, get_str_list, reject_unknown, require_str, translate,
    wire_name, FieldMap, RawParams,
};
use crate::plan::{missing_from, Action, AttrValue, Attrs, Operation, ReconciliationPlan, Target};
use crate::poller::PollState;
use crate::report::{report, Report};
use crate::transport::Transport;

use super::Reconciler;

pub const INTERFACES_PATH: &str = "/openconfig-interfaces:interfaces";
pub const LACP_PATH: &str = "/openconfig-lacp:lacp/interfaces";

/// Interface type of a LAG, without its module prefix.
pub const LAG_INTERFACE_TYPE: &str = "ieee8023adLag";
const LAG_INTERFACE_TYPE_WIRE: &str = "iana-if-type:ieee8023adLag";
const AGGREGATE_ID: &str = "openconfig-if-aggregate:aggregate-id";

/// Device leaf name to internal name.
const FIELD_MAP: FieldMap = &[
    ("type", "interface_type"),
    ("lag-type", "lag_type"),
    ("lacp-mode", "mode"),
    ("trunk-vlans", "trunk_vlans"),
    ("native-vlan", "native_vlan"),
];

const ALLOWED: &[&str] = &[
    "name",
    "trunk_vlans",
    "native_vlan",
    "lag_type",
    "mode",
    "interval",
    "config_members",
    "state",
];

const VLAN_MIN: i64 = 1;
const VLAN_MAX: i64 = 4094;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagType {
    Lacp,
    Static,
}

impl LagType {
    const CHOICES: &'static [&'static str] = &["LACP", "STATIC"];
    const ALL: [LagType; 2] = [LagType::Lacp, LagType::Static];

    pub fn as_str(&self) -> &'static str {
        Self::CHOICES[*self as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LacpMode {
    Active,
    Passive,
}

impl LacpMode {
    const CHOICES: &'static [&'static str] = &["ACTIVE", "PASSIVE"];
    const ALL: [LacpMode; 2] = [LacpMode::Active, LacpMode::Passive];

    pub fn as_str(&self) -> &'static str {
        Self::CHOICES[*self as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LacpInterval {
    Fast,
    Slow,
}

impl LacpInterval {
    const CHOICES: &'static [&'static str] = &["FAST", "SLOW"];
    const ALL: [LacpInterval; 2] = [LacpInterval::Fast, LacpInterval::Slow];

    pub fn as_str(&self) -> &'static str {
        Self::CHOICES[*self as usize]
    }
}

/// Normalized LAG intent, or LAG state read back from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct LagParams {
    pub name: String,
    pub state: Target,
    /// Only set on observed state.
    pub interface_type: Option<String>,
    pub lag_type: Option<LagType>,
    pub mode: Option<LacpMode>,
    pub interval: Option<LacpInterval>,
    pub trunk_vlans: Option<Vec<u16>>,
    pub native_vlan: Option<u16>,
    pub config_members: Option<Vec<String>>,
}

fn vlan_list(raw: &RawParams, key: &str) -> Result<Option<Vec<u16>>> {
    let Some(vlans) = get_int_list(raw, key)? else {
        return Ok(None);
    };
    vlans
        .into_iter()
        .map(|v| {
            if (VLAN_MIN..=VLAN_MAX).contains(&v) {
                Ok(v as u16)
            } else {
                Err(Error::validation(format!(
                    "Parameter '{}' must contain VLAN IDs between {} and {}, got {}",
                    key, VLAN_MIN, VLAN_MAX, v
                )))
            }
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn typed_fields(raw: &RawParams) -> Result<(Option<LagType>, Option<LacpMode>, Option<LacpInterval>)> {
    let lag_type = get_choice(raw, "lag_type", LagType::CHOICES)?.map(|i| LagType::ALL[i]);
    let mode = get_choice(raw, "mode", LacpMode::CHOICES)?.map(|i| LacpMode::ALL[i]);
    let interval = get_choice(raw, "interval", LacpInterval::CHOICES)?.map(|i| LacpInterval::ALL[i]);
    Ok((lag_type, mode, interval))
}

/// Intent validators applied to device data; a failure there is the device's.
fn device_value<T>(value: Result<T>) -> Result<T> {
    value.map_err(|e| match e {
        Error::Validation(msg) => Error::device(msg),
        other => other,
    })
}

fn device_vlan(value: &Value) -> Result<u16> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.filter(|id| (VLAN_MIN..=VLAN_MAX).contains(id))
        .map(|id| id as u16)
        .ok_or_else(|| Error::device(format!("Unexpected VLAN ID on device: {}", value)))
}

/// Trunk VLANs as stored on the device: IDs or inclusive `low..high` ranges.
fn device_vlan_list(value: Option<&Value>) -> Result<Vec<u16>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(Error::device(format!("Unexpected trunk VLAN list on device: {}", other)))
        }
    };

    let mut vlans = Vec::new();
    for item in items {
        match item.as_str().and_then(|s| s.split_once("..")) {
            Some((low, high)) => {
                let low = device_vlan(&Value::String(low.to_string()))?;
                let high = device_vlan(&Value::String(high.to_string()))?;
                if low > high {
                    return Err(Error::device(format!("Unexpected VLAN range on device: {}", item)));
                }
                vlans.extend(low..=high);
            }
            None => vlans.push(device_vlan(item)?),
        }
    }
    Ok(vlans)
}

impl LagParams {
    /// Normalize declared intent.
    pub fn from_raw(raw: &RawParams) -> Result<Self> {
        reject_unknown(raw, ALLOWED, "lag")?;

        let name = require_str(raw, "name")?;
        let state = match get_choice(raw, "state", &["present", "absent"])? {
            Some(1) => Target::Absent,
            _ => Target::Present,
        };
        let (lag_type, mode, interval) = typed_fields(raw)?;
        if lag_type == Some(LagType::Static) && (mode.is_some() || interval.is_some()) {
            return Err(Error::validation(
                "mode and interval can only be set on a LACP aggregation group",
            ));
        }

        Ok(Self {
            name,
            state,
            interface_type: None,
            lag_type,
            mode,
            interval,
            trunk_vlans: vlan_list(raw, "trunk_vlans")?,
            native_vlan: get_int_in(raw, "native_vlan", VLAN_MIN, VLAN_MAX)?.map(|v| v as u16),
            config_members: get_str_list(raw, "config_members")?,
        })
    }

    /// Read one element of `openconfig-interfaces:interface`.
    ///
    /// Members and LACP settings live elsewhere and are filled in by the
    /// reconciler when it needs them. A missing trunk VLAN list reads as
    /// empty. Values the device should never hold are device errors.
    pub fn from_api(doc: &Value) -> Result<Self> {
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::device("interface entry without a name"))?;

        let aggregation = &doc["openconfig-if-aggregate:aggregation"];
        let mut flat = RawParams::new();
        for container in [
            &doc["config"],
            &aggregation["config"],
            &aggregation["openconfig-vlan:switched-vlan"]["config"],
        ] {
            if let Some(leaves) = container.as_object() {
                flat.extend(leaves.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        let flat = translate(&flat, FIELD_MAP);

        let interface_type = flat
            .get("interface_type")
            .and_then(Value::as_str)
            .map(|t| t.rsplit(':').next().unwrap_or(t).to_string());
        let (lag_type, _, _) = device_value(typed_fields(&flat))?;
        let native_vlan = match flat.get("native_vlan") {
            None | Some(Value::Null) => None,
            Some(v) => Some(device_vlan(v)?),
        };

        Ok(Self {
            name: name.to_string(),
            state: Target::Present,
            interface_type,
            lag_type,
            mode: None,
            interval: None,
            trunk_vlans: Some(device_vlan_list(flat.get("trunk_vlans"))?),
            native_vlan,
            config_members: None,
        })
    }

    pub fn is_lacp(&self) -> bool {
        self.lag_type == Some(LagType::Lacp)
    }

    /// Supplied attributes only.
    pub fn attrs(&self) -> Attrs {
        let mut attrs = Attrs::new();
        if let Some(t) = self.lag_type {
            attrs.insert("lag_type", AttrValue::Str(t.as_str().to_string()));
        }
        if let Some(m) = self.mode {
            attrs.insert("mode", AttrValue::Str(m.as_str().to_string()));
        }
        if let Some(i) = self.interval {
            attrs.insert("interval", AttrValue::Str(i.as_str().to_string()));
        }
        if let Some(vlans) = &self.trunk_vlans {
            attrs.insert(
                "trunk_vlans",
                AttrValue::IntList(vlans.iter().map(|v| i64::from(*v)).collect()),
            );
        }
        if let Some(v) = self.native_vlan {
            attrs.insert("native_vlan", AttrValue::Int(i64::from(v)));
        }
        if let Some(members) = &self.config_members {
            attrs.insert("config_members", AttrValue::StrList(members.clone()));
        }
        attrs
    }

    /// Attributes as read from the device. Leaves that were read but are not
    /// configured show up as [`AttrValue::Unset`].
    fn observed_attrs(&self, lacp_read: bool) -> Attrs {
        let mut attrs = self.attrs();
        attrs.entry("lag_type").or_insert(AttrValue::Unset);
        attrs.entry("native_vlan").or_insert(AttrValue::Unset);
        if lacp_read {
            attrs.entry("mode").or_insert(AttrValue::Unset);
            attrs.entry("interval").or_insert(AttrValue::Unset);
        }
        attrs
    }
}

fn interface_path(name: &str) -> String {
    format!("{}/interface={}", INTERFACES_PATH, encode_key(name))
}

fn aggregation_path(name: &str) -> String {
    format!("{}/openconfig-if-aggregate:aggregation", interface_path(name))
}

fn lacp_path(name: &str) -> String {
    format!("{}/interface={}", LACP_PATH, encode_key(name))
}

fn interfaces_body(interface: Value) -> Value {
    json!({ "openconfig-interfaces:interfaces": { "interface": [interface] } })
}

fn lacp_body(name: &str, mode: Option<LacpMode>, interval: Option<LacpInterval>) -> Value {
    let mut config = Map::new();
    config.insert("name".into(), json!(name));
    if let Some(m) = mode {
        config.insert(wire_name(FIELD_MAP, "mode").into(), json!(m.as_str()));
    }
    if let Some(i) = interval {
        config.insert("interval".into(), json!(i.as_str()));
    }
    json!({
        "openconfig-lacp:lacp": {
            "interfaces": { "interface": [{ "name": name, "config": config }] }
        }
    })
}

fn attach_member(member: &str, lag: &str) -> Operation {
    Operation::patch(
        "/",
        interfaces_body(json!({
            "name": member,
            "openconfig-if-ethernet:ethernet": { "config": { AGGREGATE_ID: lag } }
        })),
    )
}

fn detach_member(member: &str) -> Operation {
    Operation::delete(format!(
        "{}/openconfig-if-ethernet:ethernet/config/{}",
        interface_path(member),
        AGGREGATE_ID
    ))
}

/// Reconciler for [`LagParams`].
pub struct LagReconciler;

impl LagReconciler {
    async fn read_members(&self, transport: &dyn Transport, lag: &str) -> Result<Vec<String>> {
        let response = transport.get(INTERFACES_PATH).await?.error_for_status()?;
        let members = response.contents["openconfig-interfaces:interfaces"]["interface"]
            .as_array()
            .map(|interfaces| {
                interfaces
                    .iter()
                    .filter(|i| {
                        i["openconfig-if-ethernet:ethernet"]["config"][AGGREGATE_ID].as_str()
                            == Some(lag)
                    })
                    .filter_map(|i| i["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        debug!(lag, members = ?members, "Read LAG members");
        Ok(members)
    }

    async fn read_lacp(
        &self,
        transport: &dyn Transport,
        lag: &str,
    ) -> Result<(Option<LacpMode>, Option<LacpInterval>)> {
        let response = transport.get(&lacp_path(lag)).await?;
        if response.is_not_found() {
            return Ok((None, None));
        }
        let response = response.error_for_status()?;
        let config = response.contents["openconfig-lacp:interface"]
            .get(0)
            .and_then(|i| i["config"].as_object())
            .map(|c| translate(c, FIELD_MAP))
            .unwrap_or_default();
        let (_, mode, interval) = device_value(typed_fields(&config))?;
        Ok((mode, interval))
    }

    fn update_operations(&self, spec: &LagParams, plan: &ReconciliationPlan) -> Vec<Operation> {
        let name = spec.name.as_str();
        let changes = &plan.changes;
        let mut ops = Vec::new();

        let mut aggregation_config = Map::new();
        let mut vlan_config = Map::new();
        let mut vlan_removals = Vec::new();

        if let Some(lag_type) = changes.get("lag_type") {
            aggregation_config.insert(wire_name(FIELD_MAP, "lag_type").into(), lag_type.to_json());
        }
        if let Some(want) = changes.get("trunk_vlans") {
            let have = plan.observed("trunk_vlans").map(AttrValue::as_int_list).unwrap_or(&[]);
            let added = missing_from(want.as_int_list(), have);
            if !added.is_empty() {
                vlan_config.insert(wire_name(FIELD_MAP, "trunk_vlans").into(), json!(added));
            }
            vlan_removals = missing_from(have, want.as_int_list());
        }
        if let Some(native) = changes.get("native_vlan") {
            vlan_config.insert(wire_name(FIELD_MAP, "native_vlan").into(), native.to_json());
        }

        if !aggregation_config.is_empty() || !vlan_config.is_empty() {
            let mut aggregation = Map::new();
            if !aggregation_config.is_empty() {
                aggregation.insert("config".into(), Value::Object(aggregation_config));
            }
            if !vlan_config.is_empty() {
                aggregation.insert(
                    "openconfig-vlan:switched-vlan".into(),
                    json!({ "config": vlan_config }),
                );
            }
            ops.push(Operation::patch(
                "/",
                interfaces_body(json!({
                    "name": name,
                    "openconfig-if-aggregate:aggregation": aggregation
                })),
            ));
        }

        match changes.get("lag_type").and_then(AttrValue::as_str) {
            Some("LACP") => ops.push(Operation::patch(
                "/",
                lacp_body(
                    name,
                    Some(spec.mode.unwrap_or(LacpMode::Active)),
                    Some(spec.interval.unwrap_or(LacpInterval::Fast)),
                ),
            )),
            Some(_) => ops.push(Operation::delete(lacp_path(name))),
            None if changes.contains_key("mode") || changes.contains_key("interval") => {
                let mode = changes.contains_key("mode").then_some(spec.mode).flatten();
                let interval = changes.contains_key("interval").then_some(spec.interval).flatten();
                ops.push(Operation::patch("/", lacp_body(name, mode, interval)));
            }
            None => {}
        }

        for vlan in vlan_removals {
            ops.push(Operation::delete(format!(
                "{}/openconfig-vlan:switched-vlan/config/trunk-vlans={}",
                aggregation_path(name),
                vlan
            )));
        }

        if let Some(want) = changes.get("config_members") {
            let have = plan.observed("config_members").map(AttrValue::as_str_list).unwrap_or(&[]);
            for member in missing_from(want.as_str_list(), have) {
                ops.push(attach_member(&member, name));
            }
            for member in missing_from(have, want.as_str_list()) {
                ops.push(detach_member(&member));
            }
        }

        ops
    }
}

#[async_trait]
impl Reconciler for LagReconciler {
    type Spec = LagParams;

    fn kind(&self) -> &'static str {
        "lag"
    }

    fn target(&self, spec: &LagParams) -> Target {
        spec.state
    }

    async fn observe(&self, transport: &dyn Transport, spec: &LagParams) -> Result<Option<Attrs>> {
        let response = transport.get(&interface_path(&spec.name)).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let doc = response.contents["openconfig-interfaces:interface"]
            .get(0)
            .ok_or_else(|| Error::device(format!("unexpected response for interface {}", spec.name)))?;

        let mut observed = LagParams::from_api(doc)?;
        if observed.interface_type.as_deref() != Some(LAG_INTERFACE_TYPE) {
            return Err(Error::validation(format!(
                "Interface {} exists but is not a LAG (type {})",
                spec.name,
                observed.interface_type.as_deref().unwrap_or("unknown")
            )));
        }

        if spec.state == Target::Present
            && spec.lag_type.is_none()
            && observed.lag_type == Some(LagType::Static)
            && (spec.mode.is_some() || spec.interval.is_some())
        {
            return Err(Error::validation(format!(
                "LAG {} is STATIC; mode and interval can only be set on a LACP aggregation group",
                spec.name
            )));
        }

        if spec.config_members.is_some() || spec.state == Target::Absent {
            observed.config_members = Some(self.read_members(transport, &spec.name).await?);
        }

        let lacp_read = observed.is_lacp()
            && spec.state == Target::Present
            && (spec.mode.is_some() || spec.interval.is_some());
        if lacp_read {
            let (mode, interval) = self.read_lacp(transport, &spec.name).await?;
            observed.mode = mode;
            observed.interval = interval;
        }

        Ok(Some(observed.observed_attrs(lacp_read)))
    }

    fn desired(&self, spec: &LagParams) -> Attrs {
        spec.attrs()
    }

    fn operations(&self, spec: &LagParams, plan: &ReconciliationPlan) -> Result<Vec<Operation>> {
        let name = spec.name.as_str();
        match plan.action {
            Action::NoOp => Ok(Vec::new()),
            Action::Create => {
                let lag_type = spec.lag_type.unwrap_or(LagType::Lacp);
                let mut aggregation = json!({
                    "config": { "name": name, "lag-type": lag_type.as_str() }
                });
                let mut vlan_config = Map::new();
                if let Some(vlans) = spec.trunk_vlans.as_ref().filter(|v| !v.is_empty()) {
                    vlan_config.insert("trunk-vlans".into(), json!(vlans));
                }
                if let Some(native) = spec.native_vlan {
                    vlan_config.insert("native-vlan".into(), json!(native));
                }
                if !vlan_config.is_empty() {
                    aggregation["openconfig-vlan:switched-vlan"] = json!({ "config": vlan_config });
                }

                let mut ops = vec![Operation::patch(
                    "/",
                    interfaces_body(json!({
                        "name": name,
                        "config": {
                            "name": name,
                            "type": LAG_INTERFACE_TYPE_WIRE,
                            "enabled": true
                        },
                        "openconfig-if-aggregate:aggregation": aggregation
                    })),
                )];
                if lag_type == LagType::Lacp {
                    ops.push(Operation::patch(
                        "/",
                        lacp_body(
                            name,
                            Some(spec.mode.unwrap_or(LacpMode::Active)),
                            Some(spec.interval.unwrap_or(LacpInterval::Fast)),
                        ),
                    ));
                }
                for member in spec.config_members.iter().flatten() {
                    ops.push(attach_member(member, name));
                }
                Ok(ops)
            }
            Action::Update => Ok(self.update_operations(spec, plan)),
            Action::Delete => {
                let mut ops: Vec<Operation> = plan
                    .observed("config_members")
                    .map(AttrValue::as_str_list)
                    .unwrap_or(&[])
                    .iter()
                    .map(String::as_str)
                    .map(detach_member)
                    .collect();
                if plan.observed("lag_type").and_then(AttrValue::as_str) == Some(LagType::Lacp.as_str()) {
                    ops.push(Operation::delete(lacp_path(name)));
                }
                ops.push(Operation::delete(interface_path(name)));
                Ok(ops)
            }
        }
    }

    fn report(
        &self,
        spec: &LagParams,
        plan: &ReconciliationPlan,
        poll: Option<&PollState>,
    ) -> Report {
        let mut result = report(plan, poll).field("name", Some(&spec.name));
        for (key, value) in &plan.changes {
            result = result.field(key, Some(value.to_json()));
        }
        result
    }
}
