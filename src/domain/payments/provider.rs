//! Payment provider identities and the country/currency routing policy.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{CountryCode, Currency};

/// The closed set of supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Card-network processor.
    Stripe,
    /// Mobile-money and card aggregator (West and South Africa).
    Paystack,
    /// Mobile-money and card aggregator (pan-African).
    Flutterwave,
    /// Mobile-wallet rail, KES only.
    Mpesa,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Stripe,
        ProviderKind::Paystack,
        ProviderKind::Flutterwave,
        ProviderKind::Mpesa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::Paystack => "paystack",
            ProviderKind::Flutterwave => "flutterwave",
            ProviderKind::Mpesa => "mpesa",
        }
    }

    /// Currency allowlist for this provider.
    pub fn supported_currencies(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Stripe => &["USD", "EUR", "GBP", "CAD", "AUD"],
            ProviderKind::Paystack => &["NGN", "GHS", "ZAR", "KES", "USD"],
            ProviderKind::Flutterwave => &[
                "NGN", "GHS", "KES", "UGX", "TZS", "RWF", "ZAR", "USD", "EUR", "GBP",
            ],
            ProviderKind::Mpesa => &["KES"],
        }
    }

    /// Currency used when the requested one is not supported.
    pub fn native_currency(&self) -> Currency {
        Currency::from_static(match self {
            ProviderKind::Stripe => "USD",
            ProviderKind::Paystack => "NGN",
            ProviderKind::Flutterwave => "NGN",
            ProviderKind::Mpesa => "KES",
        })
    }

    pub fn supports(&self, currency: &Currency) -> bool {
        self.supported_currencies().contains(&currency.as_str())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stripe" => Ok(ProviderKind::Stripe),
            "paystack" => Ok(ProviderKind::Paystack),
            "flutterwave" => Ok(ProviderKind::Flutterwave),
            "mpesa" | "m-pesa" => Ok(ProviderKind::Mpesa),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Outcome of provider selection for a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub currency: Currency,
}

/// Preferred provider and local currency per country.
static COUNTRY_ROUTES: Lazy<HashMap<&'static str, (ProviderKind, &'static str)>> = Lazy::new(|| {
    use ProviderKind::*;
    let mut routes = HashMap::new();
    routes.insert("NG", (Paystack, "NGN"));
    routes.insert("GH", (Paystack, "GHS"));
    routes.insert("ZA", (Paystack, "ZAR"));
    routes.insert("KE", (Mpesa, "KES"));
    routes.insert("UG", (Flutterwave, "UGX"));
    routes.insert("TZ", (Flutterwave, "TZS"));
    routes.insert("RW", (Flutterwave, "RWF"));
    routes.insert("US", (Stripe, "USD"));
    routes.insert("GB", (Stripe, "GBP"));
    routes.insert("CA", (Stripe, "CAD"));
    routes.insert("AU", (Stripe, "AUD"));
    for eurozone in [
        "AT", "BE", "CY", "DE", "EE", "ES", "FI", "FR", "GR", "HR", "IE", "IT", "LT", "LU",
        "LV", "MT", "NL", "PT", "SI", "SK",
    ] {
        routes.insert(eurozone, (Stripe, "EUR"));
    }
    routes
});

/// Picks the preferred provider and currency for a country.
///
/// A requested currency is honored when the provider supports it, then the
/// country's local currency, then the provider's native currency.
pub fn select_provider(country: &CountryCode, requested: Option<&Currency>) -> ProviderSelection {
    let (provider, local) = COUNTRY_ROUTES
        .get(country.as_str())
        .copied()
        .unwrap_or((ProviderKind::Stripe, "USD"));
    selection_for(provider, requested, local)
}

/// Like [`select_provider`] but restricted to providers that are configured.
///
/// Falls back to Stripe when the preferred rail is unavailable.
pub fn select_enabled_provider(
    country: &CountryCode,
    requested: Option<&Currency>,
    enabled: &[ProviderKind],
) -> Option<ProviderSelection> {
    let preferred = select_provider(country, requested);
    if enabled.contains(&preferred.provider) {
        return Some(preferred);
    }
    if enabled.contains(&ProviderKind::Stripe) {
        let local = preferred.currency.as_str().to_string();
        return Some(selection_for(ProviderKind::Stripe, requested, &local));
    }
    None
}

/// Picks the provider that pays out in `currency`.
pub fn select_payout_provider(currency: &Currency, enabled: &[ProviderKind]) -> Option<ProviderKind> {
    let order = [
        ProviderKind::Mpesa,
        ProviderKind::Paystack,
        ProviderKind::Flutterwave,
        ProviderKind::Stripe,
    ];
    order
        .iter()
        .copied()
        .filter(|p| enabled.contains(p))
        .find(|p| p.native_currency() == *currency)
        .or_else(|| {
            order
                .iter()
                .copied()
                .filter(|p| enabled.contains(p))
                .find(|p| p.supports(currency))
        })
}

fn selection_for(provider: ProviderKind, requested: Option<&Currency>, local: &str) -> ProviderSelection {
    let currency = match requested {
        Some(c) if provider.supports(c) => c.clone(),
        _ => match Currency::new(local) {
            Ok(c) if provider.supports(&c) => c,
            _ => provider.native_currency(),
        },
    };
    ProviderSelection { provider, currency }
}
