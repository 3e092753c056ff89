use std::collections::HashSet;

/// Symbols the engine is ever allowed to trade
///
/// Covers plain and suffixed forex names (`.sml`, `.a`, `.pro`) plus the
/// commodity, index, crypto, metal and CFD symbols the terminal offers.
const DEFAULT_ALLOWED: &[&str] = &[
    // Forex
    "AUDCAD", "AUDCHF", "AUDJPY", "AUDNZD", "AUDUSD",
    "CADCHF", "CADJPY", "CHFJPY",
    "EURAUD", "EURCAD", "EURCHF", "EURGBP", "EURJPY", "EURNOK", "EURNZD", "EURSEK", "EURUSD",
    "GBPAUD", "GBPCAD", "GBPCHF", "GBPJPY", "GBPUSD", "GBPNZD",
    "NZDCAD", "NZDCHF", "NZDJPY", "NZDUSD",
    "USDCAD", "USDCHF", "USDJPY", "USDMXN", "USDNOK", "USDSEK", "USDSGD", "USDZAR",
    // Suffixed forex
    "AUDUSD.sml", "EURGBP.sml", "EURUSD.sml", "GBPJPY.sml", "GBPUSD.sml", "USDJPY.sml",
    "AUDUSD.a", "EURUSD.a", "GBPUSD.a", "USDJPY.a",
    "AUDUSD.pro", "EURUSD.pro", "GBPUSD.pro", "USDJPY.pro",
    // Minor and exotic forex
    "XAGUSD", "SGDJPY", "USDCNH", "USDHKD", "EURCZK", "EURHUF", "EURPLN",
    "USDCZK", "USDHUF", "USDPLN", "ZARJPY", "TRYJPY", "EURTRY", "USDTRY",
    "EURDKK", "USDDKK", "GBPGBX", "GBXUSD",
    // Commodities
    "COPPER", "NATGAS", "SUGAR", "WHEAT", "CORN", "SOYBN",
    "UKOIL.sml", "USOIL.sml", "UKOIL", "USOIL", "XBRUSD", "WTIUSD",
    // Indices
    "EU50", "HK50", "JP225", "NL25", "UK100", "US100", "US2000", "US30", "US500",
    "CH20", "CHINAH", "ES35", "DE40", "AU200", "CN50", "FR40", "SG30",
    // Crypto
    "ADAUSD", "BCHUSD", "BNBUSD", "BTCUSD", "DOGEUSD", "DOTUSD", "ETHUSD",
    "LINKUSD", "LTCUSD", "MATICUSD", "AVAXUSD", "UNIUSD", "XTZUSD", "XLMUSD",
    "EOSUSD", "KSMUSD", "GLMRUSD", "SOLUSD",
    "BCHJPY", "BTCJPY", "ETHJPY", "LTCJPY",
    // Metals
    "XAUUSD", "XAUUSD.sml", "XAGUSD.sml",
    // Share CFDs
    "AAPL_CFD.US", "AMZN_CFD.US", "TSLA_CFD.US", "NVDA_CFD.US", "GOOGL_CFD.US",
    "META_CFD.US", "MSFT_CFD.US", "NFLX_CFD.US",
    "BARC_CFD.UK", "LLOY_CFD.UK", "BBVA_CFD.ES", "DANSKE_CFD.DK",
];

/// Static allow-list filter
///
/// Pure membership test: anything outside the set is silently dropped from
/// every downstream stage, never reported as an error.
#[derive(Debug, Clone)]
pub struct InstrumentGate {
    allowed: HashSet<String>,
}

impl InstrumentGate {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Built-in list extended with extra symbols
    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn allowed(&self, instrument: &str) -> bool {
        self.allowed.contains(instrument)
    }

    /// Keep only admitted instruments, preserving order and dropping duplicates
    pub fn filter(&self, instruments: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut admitted = Vec::new();

        for instrument in instruments {
            if !self.allowed(instrument) {
                tracing::warn!(instrument = %instrument, "Instrument not in allow-list, ignoring");
                continue;
            }
            if seen.insert(instrument.as_str()) {
                admitted.push(instrument.clone());
            }
        }

        admitted
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl Default for InstrumentGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED.iter().copied())
    }
}
