//! Virtual network (ViNS)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use driftless_common::{
    DeletePolicy, Error, LifecycleStatus, NatRule, Proto, Reference, ResourceKind, Result,
    VinsSpec,
};

use super::{parse_status, parse_time, toggle, Listing, Observed, Resource};
use crate::client::{Api, CallClass, Params};
use crate::diff::{attach_only, diff};
use crate::sequencer::{apply, CollectionOps, Tier};
use crate::warnings::Warnings;

const GET: &str = "/cloudapi/vins/get";
const NAT_LIST: &str = "/cloudapi/vins/natRuleList";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VinsRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rg_id: u64,
    #[serde(default)]
    account_id: u64,
    #[serde(default)]
    network: String,
    #[serde(default)]
    desc: String,
    status: String,
    #[serde(default)]
    created_time: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NatRuleRecord {
    id: u64,
    public_port_start: u16,
    #[serde(default)]
    public_port_end: Option<u16>,
    local_ip: String,
    local_port: u16,
    protocol: Proto,
}

impl From<NatRuleRecord> for NatRule {
    fn from(record: NatRuleRecord) -> Self {
        NatRule {
            ext_port_start: record.public_port_start,
            ext_port_end: record.public_port_end,
            int_ip: record.local_ip,
            int_port: record.local_port,
            proto: record.protocol,
            rule_id: Some(record.id),
        }
    }
}

/// Observed virtual network
#[derive(Debug, Clone, Serialize)]
pub struct ObservedVins {
    pub id: u64,
    pub name: String,
    pub rg_id: u64,
    pub account_id: u64,
    pub ipcidr: String,
    pub description: String,
    pub status: LifecycleStatus,
    pub nat_rules: Vec<NatRule>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Observed for ObservedVins {
    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

struct NatRuleOps<'a> {
    api: &'a Api,
    vins_id: u64,
}

#[async_trait]
impl CollectionOps<NatRule> for NatRuleOps<'_> {
    fn label(&self) -> &'static str {
        "nat rule"
    }

    fn describe(&self, rule: &NatRule) -> String {
        format!(
            "{}-{}/{} -> {}:{}",
            rule.ext_port_start,
            rule.ext_port_end(),
            rule.proto.as_str(),
            rule.int_ip,
            rule.int_port
        )
    }

    async fn add(&self, rule: &NatRule) -> Result<()> {
        let params = Params::new()
            .with("vinsId", self.vins_id)
            .with("intIp", &rule.int_ip)
            .with("intPort", rule.int_port)
            .with("extPortStart", rule.ext_port_start)
            .with("extPortEnd", rule.ext_port_end())
            .with("proto", rule.proto.as_str());
        self.api
            .post(CallClass::Short, "/cloudapi/vins/natRuleAdd", params)
            .await
            .map(|_| ())
    }

    async fn remove(&self, rule: &NatRule) -> Result<()> {
        let rule_id = rule.rule_id.ok_or_else(|| {
            Error::InvalidSpec(format!("nat rule {} has no server id", self.describe(rule)))
        })?;
        self.api
            .post(
                CallClass::Short,
                "/cloudapi/vins/natRuleDel",
                Params::new()
                    .with("vinsId", self.vins_id)
                    .with("ruleId", rule_id),
            )
            .await
            .map(|_| ())
    }
}

pub struct VinsResource;

#[async_trait]
impl Resource for VinsResource {
    type Spec = VinsSpec;
    type Observed = ObservedVins;

    const KIND: ResourceKind = ResourceKind::Vins;

    fn validate(spec: &VinsSpec) -> Result<()> {
        spec.validate()
    }

    fn references(spec: &VinsSpec) -> Vec<Reference> {
        spec.references()
    }

    async fn fetch(api: &Api, id: u64) -> Result<ObservedVins> {
        let record: VinsRecord = api.get(GET, Params::new().with("vinsId", id)).await?;
        let status = parse_status(GET, &record.status)?;
        let rules: Listing<NatRuleRecord> =
            api.get(NAT_LIST, Params::new().with("vinsId", id)).await?;

        Ok(ObservedVins {
            id: record.id,
            name: record.name,
            rg_id: record.rg_id,
            account_id: record.account_id,
            ipcidr: record.network,
            description: record.desc,
            status,
            nat_rules: rules.into_vec().into_iter().map(NatRule::from).collect(),
            created_at: parse_time(&record.created_time),
        })
    }

    async fn create(api: &Api, spec: &VinsSpec) -> Result<u64> {
        let (path, params) = if spec.rg_id != 0 {
            (
                "/cloudapi/vins/createInRG",
                Params::new().with("rgId", spec.rg_id),
            )
        } else {
            (
                "/cloudapi/vins/createInAccount",
                Params::new().with("accountId", spec.account_id),
            )
        };
        let params = params
            .with("name", &spec.name)
            .with_opt("ipcidr", (!spec.ipcidr.is_empty()).then_some(&spec.ipcidr))
            .with_opt("desc", (!spec.description.is_empty()).then_some(&spec.description));

        let id = api.post_id(CallClass::Long, path, params).await?;
        info!("Created vins {} ({})", spec.name, id);
        Ok(id)
    }

    async fn provision(
        api: &Api,
        id: u64,
        spec: &VinsSpec,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let ops = NatRuleOps { api, vins_id: id };
        apply(&ops, &attach_only(&spec.nat_rules), Tier::BestEffort, warnings).await?;

        if !spec.enabled {
            toggle(api, ResourceKind::Vins, id, "disable").await?;
        }
        Ok(())
    }

    async fn reconcile(
        api: &Api,
        observed: &ObservedVins,
        spec: &VinsSpec,
        _prior: Option<&VinsSpec>,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let id = observed.id;
        let enabled = observed.status.is_enabled();

        if spec.enabled && !enabled {
            toggle(api, ResourceKind::Vins, id, "enable").await?;
        }

        if observed.name != spec.name {
            warnings.push(
                format!("vins {} rename", id),
                Error::InvalidSpec("vins name cannot be changed after creation".to_string()),
            );
        }
        if !spec.ipcidr.is_empty() && observed.ipcidr != spec.ipcidr {
            warnings.push(
                format!("vins {} ipcidr", id),
                Error::InvalidSpec(format!(
                    "network {} cannot be changed to {}",
                    observed.ipcidr, spec.ipcidr
                )),
            );
        }

        if observed.description != spec.description {
            warnings.push(
                format!("vins {} description", id),
                Error::InvalidSpec("description cannot be changed after creation".to_string()),
            );
        }

        let ops = NatRuleOps { api, vins_id: id };
        apply(
            &ops,
            &diff(&spec.nat_rules, &observed.nat_rules),
            Tier::BestEffort,
            warnings,
        )
        .await?;

        if !spec.enabled && enabled {
            toggle(api, ResourceKind::Vins, id, "disable").await?;
        }
        Ok(())
    }

    async fn delete(api: &Api, id: u64, policy: DeletePolicy) -> Result<()> {
        info!("Deleting vins {} (permanently: {})", id, policy.permanently);
        api.post(
            CallClass::Long,
            "/cloudapi/vins/delete",
            Params::new()
                .with("vinsId", id)
                .with("force", policy.detach_dependents)
                .with("permanently", policy.permanently),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use serde_json::json;
    use std::sync::Arc;

    fn rule(ext: u16, int_port: u16) -> NatRule {
        NatRule {
            ext_port_start: ext,
            ext_port_end: None,
            int_ip: "10.0.0.5".to_string(),
            int_port,
            proto: Proto::Tcp,
            rule_id: None,
        }
    }

    fn spec(rules: Vec<NatRule>) -> VinsSpec {
        VinsSpec {
            name: "net".to_string(),
            rg_id: 10,
            account_id: 0,
            ipcidr: String::new(),
            description: String::new(),
            enabled: true,
            nat_rules: rules,
        }
    }

    fn script(fake: &FakeApi, status: &str) {
        fake.json(
            GET,
            json!({"id": 3, "name": "net", "rgId": 10, "network": "10.0.0.0/24", "status": status}),
        );
        fake.json(
            NAT_LIST,
            json!({"data": [
                {"id": 71, "publicPortStart": 8080, "localIp": "10.0.0.5", "localPort": 80, "protocol": "tcp"},
                {"id": 72, "publicPortStart": 2222, "localIp": "10.0.0.5", "localPort": 22, "protocol": "tcp"}
            ], "entryCount": 2}),
        );
    }

    #[tokio::test]
    async fn test_nat_rule_delta() {
        let fake = Arc::new(FakeApi::new());
        script(&fake, "ENABLED");
        let api = fake.api();
        let observed = VinsResource::fetch(&api, 3).await.unwrap();
        let mut warnings = Warnings::new();

        VinsResource::reconcile(
            &api,
            &observed,
            &spec(vec![rule(8080, 80), rule(443, 443)]),
            None,
            &mut warnings,
        )
        .await
        .unwrap();

        assert_eq!(
            fake.mutations(),
            vec!["/cloudapi/vins/natRuleDel", "/cloudapi/vins/natRuleAdd"]
        );
        assert_eq!(fake.calls_to("/cloudapi/vins/natRuleDel")[0].get("ruleId"), Some("72"));
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_description_drift_is_a_warning() {
        let fake = Arc::new(FakeApi::new());
        script(&fake, "ENABLED");
        let api = fake.api();
        let observed = VinsResource::fetch(&api, 3).await.unwrap();
        let mut warnings = Warnings::new();
        let mut desired = spec(vec![rule(8080, 80), rule(2222, 22)]);
        desired.description = "edge network".to_string();

        VinsResource::reconcile(&api, &observed, &desired, None, &mut warnings)
            .await
            .unwrap();

        assert!(fake.mutations().is_empty());
        assert_eq!(warnings.operations(), vec!["vins 3 description"]);
    }

    #[tokio::test]
    async fn test_disabled_network_is_enabled_first() {
        let fake = Arc::new(FakeApi::new());
        script(&fake, "DISABLED");
        let api = fake.api();
        let observed = VinsResource::fetch(&api, 3).await.unwrap();
        let mut warnings = Warnings::new();

        VinsResource::reconcile(
            &api,
            &observed,
            &spec(vec![rule(8080, 80), rule(2222, 22)]),
            None,
            &mut warnings,
        )
        .await
        .unwrap();

        assert_eq!(fake.mutations(), vec!["/cloudapi/vins/enable"]);
    }

    #[tokio::test]
    async fn test_create_in_account_when_no_rg() {
        let fake = Arc::new(FakeApi::new());
        fake.ok("/cloudapi/vins/createInAccount", "17");
        let mut desired = spec(vec![]);
        desired.rg_id = 0;
        desired.account_id = 4;

        let id = VinsResource::create(&fake.api(), &desired).await.unwrap();

        assert_eq!(id, 17);
        assert_eq!(
            fake.calls_to("/cloudapi/vins/createInAccount")[0].get("accountId"),
            Some("4")
        );
    }
}
