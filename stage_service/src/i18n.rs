//! Localized user-facing messages.
//!
//! Validation code never formats text directly; it records an [`ErrorMessage`]
//! and the text is rendered once the request language is known.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Zh,
    En,
}

impl Lang {
    /// Parse a single language tag such as `en`, `en-US` or `zh-hans`.
    pub fn from_tag(tag: &str) -> Option<Lang> {
        let primary = tag.trim().split(['-', '_']).next()?.to_ascii_lowercase();
        match primary.as_str() {
            "en" => Some(Lang::En),
            "zh" => Some(Lang::Zh),
            _ => None,
        }
    }

    /// First recognized language of an `Accept-Language` header value.
    /// Quality weights are not ranked; browsers already send them in order.
    pub fn from_accept_language(header: &str) -> Option<Lang> {
        header
            .split(',')
            .filter_map(|part| part.split(';').next())
            .find_map(Lang::from_tag)
    }
}

/// JSON type a field was expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Object,
    List,
}

impl ValueKind {
    fn zh(&self) -> &'static str {
        match self {
            ValueKind::String => "字符串",
            ValueKind::Integer => "整数",
            ValueKind::Object => "对象",
            ValueKind::List => "列表",
        }
    }

    fn en(&self) -> &'static str {
        match self {
            ValueKind::String => "a string",
            ValueKind::Integer => "an integer",
            ValueKind::Object => "an object",
            ValueKind::List => "a list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorMessage {
    Required,
    Blank,
    InvalidType(ValueKind),
    InvalidBody(String),
    InvalidStageName,
    ReservedStageName(String),
    StageNameTrailingSeparator,
    StageNameExists,
    StageCountExceeded { max_count: i64 },
    InvalidVarName(String),
    VarValueTooLong { name: String, max_len: usize },
    TooManyVars { max_count: usize },
    DescriptionTooLong { max_len: usize },
    TimeoutOutOfRange { min: i64, max: i64 },
    InvalidLoadBalance(String),
    EmptyHosts,
    InvalidHost,
    HostWeightTooSmall,
    WeightRequired,
    InvalidHeaderKey,
    InvalidUuid,
    MicroGatewayNotFound(String),
    MicroGatewayBound,
}

impl ErrorMessage {
    pub fn localize(&self, lang: Lang) -> String {
        match lang {
            Lang::Zh => self.zh(),
            Lang::En => self.en(),
        }
    }

    fn zh(&self) -> String {
        match self {
            ErrorMessage::Required => "该字段是必填项。".to_string(),
            ErrorMessage::Blank => "该字段不能为空。".to_string(),
            ErrorMessage::InvalidType(kind) => format!("类型错误，应为{}。", kind.zh()),
            ErrorMessage::InvalidBody(detail) => format!("请求数据格式错误：{}", detail),
            ErrorMessage::InvalidStageName => {
                "环境名称由字母、数字、连接符（-）、下划线（_）组成，首字符必须是字母，长度小于20个字符。".to_string()
            }
            ErrorMessage::ReservedStageName(name) => format!("环境名称 {} 为保留名称，不可使用。", name),
            ErrorMessage::StageNameTrailingSeparator => {
                "环境名称不能以连接符（-）或下划线（_）结尾。".to_string()
            }
            ErrorMessage::StageNameExists => "网关下环境名称已经存在。".to_string(),
            ErrorMessage::StageCountExceeded { max_count } => {
                format!("每个网关最多创建 {} 个环境。", max_count)
            }
            ErrorMessage::InvalidVarName(name) => format!(
                "变量名 {} 不合法，应由字母、数字、下划线（_）组成，首字符必须是字母，长度小于50个字符。",
                name
            ),
            ErrorMessage::VarValueTooLong { name, max_len } => {
                format!("变量 {} 的值长度不能超过 {} 个字节。", name, max_len)
            }
            ErrorMessage::TooManyVars { max_count } => format!("环境变量数量不能超过 {} 个。", max_count),
            ErrorMessage::DescriptionTooLong { max_len } => {
                format!("请确保这个字段不能超过 {} 个字符。", max_len)
            }
            ErrorMessage::TimeoutOutOfRange { min, max } => {
                format!("超时时间必须在 {} 到 {} 秒之间。", min, max)
            }
            ErrorMessage::InvalidLoadBalance(value) => format!("“{}” 不是合法选项。", value),
            ErrorMessage::EmptyHosts => "列表字段不能为空值。".to_string(),
            ErrorMessage::InvalidHost => {
                "Host 格式不正确，应为 http(s)://域名或IP[:端口]。".to_string()
            }
            ErrorMessage::HostWeightTooSmall => "请确保该值大于或者等于 1。".to_string(),
            ErrorMessage::WeightRequired => "负载均衡类型为 Weighted-RR 时，Host 权重必填。".to_string(),
            ErrorMessage::InvalidHeaderKey => {
                "Header 键由字母、数字、连接符（-）组成，长度小于100个字符。".to_string()
            }
            ErrorMessage::InvalidUuid => "必须是有效的 UUID。".to_string(),
            ErrorMessage::MicroGatewayNotFound(id) => format!("微网关实例不存在，id={}。", id),
            ErrorMessage::MicroGatewayBound => "微网关实例已绑定到其它环境。".to_string(),
        }
    }

    fn en(&self) -> String {
        match self {
            ErrorMessage::Required => "This field is required.".to_string(),
            ErrorMessage::Blank => "This field may not be blank.".to_string(),
            ErrorMessage::InvalidType(kind) => format!("Expected {}.", kind.en()),
            ErrorMessage::InvalidBody(detail) => format!("Malformed request body: {}", detail),
            ErrorMessage::InvalidStageName => {
                "Stage name must start with a letter and contain only letters, digits, hyphens (-) and underscores (_), at most 20 characters.".to_string()
            }
            ErrorMessage::ReservedStageName(name) => format!("Stage name {} is reserved.", name),
            ErrorMessage::StageNameTrailingSeparator => {
                "Stage name cannot end with a hyphen (-) or an underscore (_).".to_string()
            }
            ErrorMessage::StageNameExists => "Stage name already exists under this gateway.".to_string(),
            ErrorMessage::StageCountExceeded { max_count } => {
                format!("Each gateway can have at most {} stages.", max_count)
            }
            ErrorMessage::InvalidVarName(name) => format!(
                "Variable name {} is invalid: it must start with a letter and contain only letters, digits and underscores (_), at most 50 characters.",
                name
            ),
            ErrorMessage::VarValueTooLong { name, max_len } => {
                format!("Value of variable {} cannot exceed {} bytes.", name, max_len)
            }
            ErrorMessage::TooManyVars { max_count } => {
                format!("A stage can have at most {} variables.", max_count)
            }
            ErrorMessage::DescriptionTooLong { max_len } => {
                format!("Ensure this field has no more than {} characters.", max_len)
            }
            ErrorMessage::TimeoutOutOfRange { min, max } => {
                format!("Timeout must be between {} and {} seconds.", min, max)
            }
            ErrorMessage::InvalidLoadBalance(value) => format!("\"{}\" is not a valid choice.", value),
            ErrorMessage::EmptyHosts => "This list may not be empty.".to_string(),
            ErrorMessage::InvalidHost => {
                "Invalid host, expected http(s)://domain-or-ip[:port].".to_string()
            }
            ErrorMessage::HostWeightTooSmall => {
                "Ensure this value is greater than or equal to 1.".to_string()
            }
            ErrorMessage::WeightRequired => {
                "Host weight is required when the load balance type is Weighted-RR.".to_string()
            }
            ErrorMessage::InvalidHeaderKey => {
                "Header keys contain only letters, digits and hyphens (-), fewer than 100 characters.".to_string()
            }
            ErrorMessage::InvalidUuid => "Must be a valid UUID.".to_string(),
            ErrorMessage::MicroGatewayNotFound(id) => {
                format!("Micro gateway instance does not exist, id={}.", id)
            }
            ErrorMessage::MicroGatewayBound => {
                "Micro gateway instance is already bound to another stage.".to_string()
            }
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.en())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lang_from_accept_language() {
        assert_eq!(Lang::from_accept_language("en-US,en;q=0.9"), Some(Lang::En));
        assert_eq!(Lang::from_accept_language("zh-CN,zh;q=0.9,en;q=0.8"), Some(Lang::Zh));
        assert_eq!(Lang::from_accept_language("fr-FR, en;q=0.5"), Some(Lang::En));
        assert_eq!(Lang::from_accept_language("fr"), None);
        assert_eq!(Lang::from_accept_language(""), None);
    }

    #[test]
    fn test_localize_carries_arguments() {
        let msg = ErrorMessage::StageCountExceeded { max_count: 3 };
        assert_eq!(msg.localize(Lang::En), "Each gateway can have at most 3 stages.");
        assert_eq!(msg.localize(Lang::Zh), "每个网关最多创建 3 个环境。");

        let msg = ErrorMessage::MicroGatewayNotFound("abc".to_string());
        assert!(msg.localize(Lang::En).contains("id=abc"));

        let msg = ErrorMessage::InvalidType(ValueKind::Integer);
        assert_eq!(msg.localize(Lang::En), "Expected an integer.");
        assert_eq!(msg.localize(Lang::Zh), "类型错误，应为整数。");
    }
}
