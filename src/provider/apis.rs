/// 数据源接口名
pub const API_TRADE_CAL: &str = "trade_cal";
pub const API_STOCK_BASIC: &str = "stock_basic";
pub const API_DAILY: &str = "daily";
pub const API_STK_MINS: &str = "stk_mins";
pub const API_INCOME: &str = "income";
pub const API_BALANCESHEET: &str = "balancesheet";
pub const API_FINA_INDICATOR: &str = "fina_indicator";
pub const API_CN_CPI: &str = "cn_cpi";
pub const API_CN_GDP: &str = "cn_gdp";
pub const API_SHIBOR: &str = "shibor";
pub const API_NEWS: &str = "news";

// items 按以下字段顺序逐列解析，顺序即契约
pub const FIELDS_STOCK_BASIC: &[&str] = &[
    "ts_code", "symbol", "name", "area", "industry", "market", "list_date",
];
pub const FIELDS_DAILY: &[&str] = &[
    "ts_code", "trade_date", "open", "high", "low", "close", "pre_close", "change", "pct_chg",
    "vol", "amount",
];
pub const FIELDS_STK_MINS: &[&str] = &[
    "ts_code", "trade_time", "open", "close", "high", "low", "vol", "amount",
];
pub const FIELDS_INCOME: &[&str] = &[
    "ts_code", "ann_date", "end_date", "report_type", "total_revenue", "n_income",
];
pub const FIELDS_BALANCESHEET: &[&str] = &[
    "ts_code", "ann_date", "end_date", "report_type", "total_assets", "total_liab",
    "total_hldr_eqy_exc_min_int",
];
pub const FIELDS_FINA_INDICATOR: &[&str] = &["ts_code", "ann_date", "end_date", "eps", "roe", "roa"];
pub const FIELDS_CN_CPI: &[&str] = &["month", "nt_val", "nt_yoy"];
pub const FIELDS_CN_GDP: &[&str] = &["quarter", "gdp", "gdp_yoy"];
pub const FIELDS_SHIBOR: &[&str] = &["date", "on", "1w", "1m"];
pub const FIELDS_NEWS: &[&str] = &["datetime", "title", "content", "channels"];

/// 数据源业务错误码
pub const CODE_OK: i64 = 0;
pub const CODE_TOKEN_INVALID: i64 = 40001;
pub const CODE_NO_PERMISSION: i64 = 40101;
pub const CODE_RATE_LIMIT: i64 = 40203;
