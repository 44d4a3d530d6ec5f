//! 服务配置
//!
//! All settings come from environment variables (a `.env` file is honored in
//! development).
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | HOST | 0.0.0.0 | 监听地址 |
//! | HTTP_PORT | 4000 | HTTP 服务端口 |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | DATABASE_PATH | data/akai.db | SQLite 数据库文件 |
//! | TIMEZONE | UTC | 业务时区 (IANA 名称) |
//! | STRIPE_SECRET_KEY | (必填) | Stripe API key, 非开发环境必须设置 |
//! | STRIPE_WEBHOOK_SECRET | (必填) | Webhook 签名密钥, 非开发环境必须设置 |
//! | FRONTEND_ORIGIN | http://localhost:3000 | 跳转回前端的地址 |
//! | HOLD_TTL_MINUTES | 15 | 占座保留时间 |
//! | CAPACITY_TOTAL | 8 | 每个时段的默认座位数 |
//! | MIN_GUESTS / MAX_GUESTS | 1 / 8 | 单次预订人数范围 |
//! | CURRENCY | usd | 结算币种 |
//! | PRICE_PER_PERSON_AMOUNT | 18000 | 人均价格 (最小货币单位) |
//! | DEPOSIT_BPS | 5000 | 订金比例 (basis points) |
//! | SERVICE_TIMES | 18:30,19:00,20:00,21:30 | 营业时段 |
//! | CLOSED_WEEKDAYS | 0 | 休息日 (0=周日) |
//! | LIMITED_THRESHOLD | 2 | 余位小于等于该值时标记 limited |
//! | AVAILABILITY_RANGE_MAX_DAYS | 93 | range 查询最大天数 |
//! | HOLD_EXPIRY_SWEEP_INTERVAL_SECONDS | 30 | 过期扫描间隔 |
//! | LATE_PAYMENT_REOPEN_MAX_MINUTES | 1440 | 过期后多久内的迟到支付仍可自动恢复 |

use chrono_tz::Tz;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One bookable service time within every open day
#[derive(Debug, Clone)]
pub struct ServiceTime {
    pub time: String,
    pub label: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub database_path: String,
    /// 业务时区 (判断"今天"和休息日)
    pub timezone: Tz,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub frontend_origin: String,
    pub hold_ttl_minutes: i64,
    pub capacity_total: i64,
    pub min_guests: i64,
    pub max_guests: i64,
    pub currency: String,
    /// 人均价格, 最小货币单位 (如美分)
    pub price_per_person_amount: i64,
    /// 订金比例, basis points (5000 = 50%)
    pub deposit_bps: i64,
    pub service_times: Vec<ServiceTime>,
    /// 0 (Sunday) .. 6 (Saturday)
    pub closed_weekdays: Vec<u32>,
    pub limited_threshold: i64,
    pub availability_range_max_days: i64,
    pub sweep_interval_seconds: u64,
    pub late_reopen_max_minutes: i64,
}

fn default_label(time: &str) -> &str {
    match time {
        "18:30" => "Early Evening",
        "19:00" => "Sunset",
        "20:00" => "Prime Time",
        "21:30" => "Late Night",
        other => other,
    }
}

/// Parse the comma-separated SERVICE_TIMES value into labeled entries.
pub fn parse_service_times(value: &str) -> Vec<ServiceTime> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|time| ServiceTime {
            time: time.to_string(),
            label: default_label(time).to_string(),
        })
        .collect()
}

fn parse_closed_weekdays(value: &str) -> Vec<u32> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .filter_map(|v| v.parse::<u32>().ok())
        .filter(|n| *n <= 6)
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Require a secret env var: must be set and non-empty outside development.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let timezone: Tz = std::env::var("TIMEZONE")
            .unwrap_or_else(|_| "UTC".into())
            .parse()
            .map_err(|_| "TIMEZONE must be a valid IANA timezone name")?;

        let service_times = parse_service_times(
            &std::env::var("SERVICE_TIMES").unwrap_or_else(|_| "18:30,19:00,20:00,21:30".into()),
        );
        if service_times.is_empty() {
            return Err("SERVICE_TIMES must contain at least one time".into());
        }

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            http_port: env_parse("HTTP_PORT", 4000),
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/akai.db".into()),
            timezone,
            stripe_secret_key: Self::require_secret("STRIPE_SECRET_KEY", &environment)?,
            stripe_webhook_secret: Self::require_secret("STRIPE_WEBHOOK_SECRET", &environment)?,
            frontend_origin: std::env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            hold_ttl_minutes: env_parse("HOLD_TTL_MINUTES", 15),
            capacity_total: env_parse("CAPACITY_TOTAL", 8),
            min_guests: env_parse("MIN_GUESTS", 1),
            max_guests: env_parse("MAX_GUESTS", 8),
            currency: std::env::var("CURRENCY").unwrap_or_else(|_| "usd".into()),
            price_per_person_amount: env_parse("PRICE_PER_PERSON_AMOUNT", 18000),
            deposit_bps: env_parse("DEPOSIT_BPS", 5000),
            service_times,
            closed_weekdays: parse_closed_weekdays(
                &std::env::var("CLOSED_WEEKDAYS").unwrap_or_else(|_| "0".into()),
            ),
            limited_threshold: env_parse("LIMITED_THRESHOLD", 2),
            availability_range_max_days: env_parse("AVAILABILITY_RANGE_MAX_DAYS", 93),
            sweep_interval_seconds: env_parse("HOLD_EXPIRY_SWEEP_INTERVAL_SECONDS", 30),
            late_reopen_max_minutes: env_parse("LATE_PAYMENT_REOPEN_MAX_MINUTES", 1440),
            environment,
        })
    }

    pub fn service_time(&self, time: &str) -> Option<&ServiceTime> {
        self.service_times.iter().find(|t| t.time == time)
    }

    pub fn is_closed_weekday(&self, weekday: u32) -> bool {
        self.closed_weekdays.contains(&weekday)
    }

    pub fn hold_ttl_millis(&self) -> i64 {
        self.hold_ttl_minutes * 60 * 1000
    }

    pub fn late_reopen_max_millis(&self) -> i64 {
        self.late_reopen_max_minutes * 60 * 1000
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
