//! Payment gateway kinds and per-site gateway configuration

use serde::{Deserialize, Serialize};

use super::serde_helpers::timestamp;

/// Supported payment providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Saman,
    Mellat,
    Parsian,
    Pasargad,
    IranKish,
    Melli,
    AsanPardakht,
    Sepehr,
    ZarinPal,
    PayIr,
    IdPay,
    YekPay,
    PayPing,
    ParbadVirtual,
}

impl GatewayKind {
    pub const ALL: [GatewayKind; 14] = [
        GatewayKind::Saman,
        GatewayKind::Mellat,
        GatewayKind::Parsian,
        GatewayKind::Pasargad,
        GatewayKind::IranKish,
        GatewayKind::Melli,
        GatewayKind::AsanPardakht,
        GatewayKind::Sepehr,
        GatewayKind::ZarinPal,
        GatewayKind::PayIr,
        GatewayKind::IdPay,
        GatewayKind::YekPay,
        GatewayKind::PayPing,
        GatewayKind::ParbadVirtual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Saman => "saman",
            GatewayKind::Mellat => "mellat",
            GatewayKind::Parsian => "parsian",
            GatewayKind::Pasargad => "pasargad",
            GatewayKind::IranKish => "irankish",
            GatewayKind::Melli => "melli",
            GatewayKind::AsanPardakht => "asanpardakht",
            GatewayKind::Sepehr => "sepehr",
            GatewayKind::ZarinPal => "zarinpal",
            GatewayKind::PayIr => "payir",
            GatewayKind::IdPay => "idpay",
            GatewayKind::YekPay => "yekpay",
            GatewayKind::PayPing => "payping",
            GatewayKind::ParbadVirtual => "parbadvirtual",
        }
    }

    /// Account name recorded on payments: `{gateway}-{site_id}`
    pub fn account_name(&self, site_id: i64) -> String {
        format!("{}-{}", self.as_str(), site_id)
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GatewayKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown gateway: {s}"))
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamanCredentials {
    pub merchant_id: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MellatCredentials {
    pub terminal_id: i64,
    pub user_name: String,
    pub user_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsianCredentials {
    pub login_account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasargadCredentials {
    pub merchant_code: String,
    pub terminal_code: String,
    pub private_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IranKishCredentials {
    pub terminal_id: String,
    pub acceptor_id: String,
    pub pass_phrase: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MelliCredentials {
    pub terminal_id: String,
    pub merchant_id: String,
    pub terminal_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsanPardakhtCredentials {
    pub merchant_configuration_id: String,
    pub user_name: String,
    pub password: String,
    pub key: String,
    pub iv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SepehrCredentials {
    pub terminal_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZarinPalCredentials {
    pub merchant_id: String,
    #[serde(default)]
    pub authorization_token: Option<String>,
    #[serde(default)]
    pub is_sandbox: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    pub api: String,
    #[serde(default)]
    pub is_test_account: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YekPayCredentials {
    pub merchant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPingCredentials {
    pub access_token: String,
}

/// Credentials of one provider, tagged by `gateway`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gateway", rename_all = "lowercase")]
pub enum AccountConfig {
    Saman(SamanCredentials),
    Mellat(MellatCredentials),
    Parsian(ParsianCredentials),
    Pasargad(PasargadCredentials),
    IranKish(IranKishCredentials),
    Melli(MelliCredentials),
    AsanPardakht(AsanPardakhtCredentials),
    Sepehr(SepehrCredentials),
    ZarinPal(ZarinPalCredentials),
    PayIr(ApiKeyCredentials),
    IdPay(ApiKeyCredentials),
    YekPay(YekPayCredentials),
    PayPing(PayPingCredentials),
    ParbadVirtual,
}

impl AccountConfig {
    pub fn kind(&self) -> GatewayKind {
        match self {
            AccountConfig::Saman(_) => GatewayKind::Saman,
            AccountConfig::Mellat(_) => GatewayKind::Mellat,
            AccountConfig::Parsian(_) => GatewayKind::Parsian,
            AccountConfig::Pasargad(_) => GatewayKind::Pasargad,
            AccountConfig::IranKish(_) => GatewayKind::IranKish,
            AccountConfig::Melli(_) => GatewayKind::Melli,
            AccountConfig::AsanPardakht(_) => GatewayKind::AsanPardakht,
            AccountConfig::Sepehr(_) => GatewayKind::Sepehr,
            AccountConfig::ZarinPal(_) => GatewayKind::ZarinPal,
            AccountConfig::PayIr(_) => GatewayKind::PayIr,
            AccountConfig::IdPay(_) => GatewayKind::IdPay,
            AccountConfig::YekPay(_) => GatewayKind::YekPay,
            AccountConfig::PayPing(_) => GatewayKind::PayPing,
            AccountConfig::ParbadVirtual => GatewayKind::ParbadVirtual,
        }
    }
}

/// One provider account inside a site's gateway record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAccount {
    pub is_active: bool,
    #[serde(flatten)]
    pub config: AccountConfig,
}

/// Per-site gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: i64,
    pub site_id: i64,
    pub user_id: i64,
    pub accounts: Vec<GatewayAccount>,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
}

impl Gateway {
    pub fn account(&self, kind: GatewayKind) -> Option<&GatewayAccount> {
        self.accounts.iter().find(|a| a.config.kind() == kind)
    }

    pub fn is_active(&self, kind: GatewayKind) -> bool {
        self.account(kind).is_some_and(|a| a.is_active)
    }

    /// Merge incoming accounts: an incoming entry replaces the stored entry of the same kind
    pub fn merge_accounts(&mut self, incoming: Vec<GatewayAccount>) {
        for account in incoming {
            let kind = account.config.kind();
            match self.accounts.iter_mut().find(|a| a.config.kind() == kind) {
                Some(existing) => *existing = account,
                None => self.accounts.push(account),
            }
        }
        self.accounts.sort_by_key(|a| a.config.kind());
    }
}
