use crate::model::{
    FinancialStatement, MacroObservation, MarketBar, NewsItem, Record, StockInfo,
};
use regex::Regex;
use std::sync::OnceLock;

/// 一根 K 线的最高价超过该值时，整根视为以"分"报出
const PRICE_UNIT_THRESHOLD: f64 = 10_000.0;

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("literal pattern"))
}

fn space_entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(nbsp|ensp|emsp|#160|#12288);").expect("literal pattern"))
}

fn round_to(v: f64, digits: i32) -> f64 {
    let p = 10f64.powi(digits);
    (v * p).round() / p
}

pub fn normalize_symbol(s: &str) -> String {
    s.split_whitespace().collect::<String>().to_uppercase()
}

/// 去标签、去控制字符、合并空白
pub fn clean_text(s: &str) -> String {
    let s = html_tag_re().replace_all(s, " ");
    let s = space_entity_re().replace_all(&s, " ");
    let s: String = s
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_opt_text(s: Option<String>) -> Option<String> {
    s.map(|v| clean_text(&v)).filter(|v| !v.is_empty())
}

/// 按整根 K 线确定的换算系数处理单个价格
pub fn clean_price(p: f64, divisor: f64) -> f64 {
    if !p.is_finite() || p < 0.0 {
        return 0.0;
    }
    round_to(p / divisor, 2)
}

/// 四个价格共用一个单位，避免阈值附近的 K 线被部分换算
fn price_divisor(prices: [f64; 4]) -> f64 {
    let top = prices
        .into_iter()
        .filter(|p| p.is_finite())
        .fold(0.0_f64, f64::max);
    if top > PRICE_UNIT_THRESHOLD {
        100.0
    } else {
        1.0
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

fn clean_value(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite()).map(|x| round_to(x, 4))
}

/// 记录清洗：规范化标识符和文本，把数值压回合理区间
///
/// 高低价倒挂的 K 线不做修正，交给校验环节拒绝。
#[derive(Debug, Default, Clone)]
pub struct Cleaner;

impl Cleaner {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, record: Record) -> Record {
        match record {
            Record::Market(b) => Record::Market(self.clean_bar(b)),
            Record::Stock(s) => Record::Stock(self.clean_stock(s)),
            Record::Financial(f) => Record::Financial(self.clean_financial(f)),
            Record::News(n) => Record::News(self.clean_news(n)),
            Record::Macro(m) => Record::Macro(self.clean_macro(m)),
        }
    }

    fn clean_bar(&self, mut b: MarketBar) -> MarketBar {
        b.symbol = normalize_symbol(&b.symbol);
        b.period = b.period.trim().to_lowercase();
        let divisor = price_divisor([b.open, b.high, b.low, b.close]);
        b.open = clean_price(b.open, divisor);
        b.high = clean_price(b.high, divisor);
        b.low = clean_price(b.low, divisor);
        b.close = clean_price(b.close, divisor);
        b.volume = non_negative(b.volume).round();
        b.amount = round_to(non_negative(b.amount), 2);
        if b.high >= b.low {
            b.open = b.open.clamp(b.low, b.high);
            b.close = b.close.clamp(b.low, b.high);
        }
        b
    }

    fn clean_stock(&self, mut s: StockInfo) -> StockInfo {
        s.symbol = normalize_symbol(&s.symbol);
        s.code = s.code.trim().to_string();
        s.name = clean_text(&s.name);
        s.area = clean_opt_text(s.area);
        s.industry = clean_opt_text(s.industry);
        s.market = clean_opt_text(s.market);
        s
    }

    fn clean_financial(&self, mut f: FinancialStatement) -> FinancialStatement {
        f.symbol = normalize_symbol(&f.symbol);
        f.report_type = f.report_type.trim().to_string();
        f.revenue = clean_value(f.revenue);
        f.net_profit = clean_value(f.net_profit);
        f.total_assets = clean_value(f.total_assets);
        f.total_liabilities = clean_value(f.total_liabilities);
        f.equity = clean_value(f.equity);
        f.eps = clean_value(f.eps);
        f.roe = clean_value(f.roe);
        f.roa = clean_value(f.roa);
        f
    }

    fn clean_news(&self, mut n: NewsItem) -> NewsItem {
        n.id = n.id.trim().to_string();
        n.title = clean_text(&n.title);
        n.content = clean_text(&n.content);
        n.source = n.source.trim().to_lowercase();
        n.url = n
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let mut stocks: Vec<String> = n
            .related_stocks
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();
        stocks.sort();
        stocks.dedup();
        n.related_stocks = stocks;
        n.sentiment = n
            .sentiment
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(-1.0, 1.0));
        n
    }

    fn clean_macro(&self, mut m: MacroObservation) -> MacroObservation {
        m.indicator = m.indicator.trim().to_uppercase();
        m.unit = m.unit.trim().to_string();
        if m.value.is_finite() {
            m.value = round_to(m.value, 4);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> MarketBar {
        MarketBar {
            symbol: " 600000.sh ".into(),
            trade_time: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            period: "1D".into(),
            open,
            high,
            low,
            close,
            volume: -5.0,
            amount: 1234.5678,
        }
    }

    fn cleaned_bar(b: MarketBar) -> MarketBar {
        match Cleaner::new().clean(Record::Market(b)) {
            Record::Market(b) => b,
            _ => unreachable!(),
        }
    }

    #[test]
    fn bar_prices_clamp_into_high_low_range() {
        let cases = [
            (12.0, 11.0, 10.0, 9.5),
            (9.0, 11.0, 10.0, 11.5),
            (-1.0, 11.0, 0.0, 3.0),
            (10.456, 10.789, 10.123, 10.5),
            (1050.0, 1100.0, 1000.0, 1080.0),
        ];
        for (o, h, l, c) in cases {
            let b = cleaned_bar(bar(o, h, l, c));
            assert!(b.high >= b.low && b.low >= 0.0);
            assert!(b.low <= b.open && b.open <= b.high, "{:?}", b);
            assert!(b.low <= b.close && b.close <= b.high, "{:?}", b);
        }
    }

    #[test]
    fn bar_identifiers_volume_and_precision_are_normalized() {
        let b = cleaned_bar(bar(10.456, 10.789, 10.123, 10.5));
        assert_eq!(b.symbol, "600000.SH");
        assert_eq!(b.period, "1d");
        assert_eq!(b.volume, 0.0);
        assert_eq!(b.amount, 1234.57);
        assert_eq!(b.open, 10.46);
        assert_eq!(b.high, 10.79);
    }

    #[test]
    fn fen_denominated_prices_are_scaled_down() {
        let b = cleaned_bar(bar(1_050_00.0, 1_100_00.0, 1_000_00.0, 1_080_00.0));
        assert_eq!(b.high, 1100.0);
        assert_eq!(b.close, 1080.0);
    }

    #[test]
    fn bar_around_unit_threshold_is_scaled_as_a_whole() {
        let b = cleaned_bar(bar(9990.0, 10010.0, 9980.0, 10005.0));
        assert_eq!((b.open, b.high, b.low, b.close), (99.9, 100.1, 99.8, 100.05));

        let b = cleaned_bar(bar(9990.0, 9999.0, 9980.0, 9995.0));
        assert_eq!(b.high, 9999.0);
        assert_eq!(b.low, 9980.0);
    }

    #[test]
    fn inverted_bar_is_left_for_validation() {
        let b = cleaned_bar(bar(10.0, 9.0, 11.0, 10.0));
        assert!(b.high < b.low);
    }

    #[test]
    fn text_loses_markup_and_control_characters() {
        assert_eq!(
            clean_text("<p>央行&nbsp;降准</p>\u{0007}\n\n 利好<br/>银行"),
            "央行 降准 利好 银行"
        );
    }

    #[test]
    fn news_sentiment_is_clamped() {
        let item = NewsItem {
            title: "t".into(),
            sentiment: Some(3.2),
            related_stocks: vec!["000001.sz".into(), "000001.SZ".into()],
            ..Default::default()
        };
        let Record::News(n) = Cleaner::new().clean(Record::News(item)) else {
            unreachable!()
        };
        assert_eq!(n.sentiment, Some(1.0));
        assert_eq!(n.related_stocks, vec!["000001.SZ".to_string()]);
    }
}
