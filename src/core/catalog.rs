//! Built-in dashboard modules, in sidebar order.

use crate::core::chart::ChartKind;
use crate::core::gateway::SYMBOL_PARAM;
use crate::core::indicators::Overlay;
use crate::core::query::Query;
use crate::core::router::ModuleDescriptor;
use crate::providers::yahoo_finance::{
    CRYPTO_HISTORICAL, CURRENCY_HISTORICAL, EQUITY_HISTORICAL, INDEX_HISTORICAL, PROVIDER_ID,
};

fn price_query(function: &str, symbol: &str) -> Query {
    Query::new(PROVIDER_ID, function).with_param(SYMBOL_PARAM, symbol)
}

pub fn default_modules() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::new(
            "📈 股票 (Equity)",
            price_query(EQUITY_HISTORICAL, "QQQ"),
            ChartKind::Candlestick,
        )
        .describe("Historical equity prices with volume")
        .with_volume(),
        ModuleDescriptor::new(
            "💰 ETF",
            price_query(EQUITY_HISTORICAL, "SPY"),
            ChartKind::Area,
        )
        .describe("ETF closing prices, compared normalized to 100")
        .comparing(["SPY", "QQQ", "IWM", "DIA"]),
        ModuleDescriptor::new(
            "📊 指数 (Index)",
            price_query(INDEX_HISTORICAL, "^GSPC"),
            ChartKind::Line,
        )
        .describe("Index levels"),
        ModuleDescriptor::new(
            "💵 外汇 (Currency)",
            price_query(CURRENCY_HISTORICAL, "EURUSD=X"),
            ChartKind::Candlestick,
        )
        .describe("Currency pair exchange rates"),
        ModuleDescriptor::new(
            "🔧 技术分析 (Technical)",
            price_query(EQUITY_HISTORICAL, "QQQ"),
            ChartKind::Candlestick,
        )
        .describe("Moving averages, Bollinger bands, RSI, MACD and a signal summary")
        .with_volume()
        .with_overlays([
            Overlay::Sma(20),
            Overlay::Sma(50),
            Overlay::Bollinger(20),
            Overlay::Rsi(14),
            Overlay::Macd,
        ])
        .with_signals(),
        ModuleDescriptor::new(
            "📐 量化分析 (Quantitative)",
            price_query(EQUITY_HISTORICAL, "QQQ"),
            ChartKind::Line,
        )
        .describe("Return and risk statistics, with a return correlation matrix")
        .comparing(["QQQ", "SPY", "IWM", "TLT", "GLD"]),
        ModuleDescriptor::new(
            "💎 加密货币 (Crypto)",
            price_query(CRYPTO_HISTORICAL, "BTC-USD"),
            ChartKind::Candlestick,
        )
        .describe("Cryptocurrency prices and volume")
        .with_volume(),
        ModuleDescriptor::new(
            "🛢️ 大宗商品 (Commodity)",
            price_query(EQUITY_HISTORICAL, "GC=F"),
            ChartKind::Candlestick,
        )
        .describe("Commodity futures (gold by default)"),
        ModuleDescriptor::new(
            "🏛️ 固定收益 (Fixed Income)",
            price_query(EQUITY_HISTORICAL, "TLT"),
            ChartKind::Line,
        )
        .describe("Treasury bond ETF prices"),
    ]
}
