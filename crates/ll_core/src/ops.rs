//! 标准运算符表 (读写共用)

/// 运算符结合类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Xfx,
    Xfy,
    Yfx,
    Fy,
    Fx,
}

/// 运算符定义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDef {
    pub priority: u16,
    pub kind: OpType,
}

impl OpDef {
    const fn new(priority: u16, kind: OpType) -> Self {
        Self { priority, kind }
    }

    /// 左右操作数允许的最大优先级
    pub fn arg_max(&self) -> (u16, u16) {
        let p = self.priority;
        match self.kind {
            OpType::Xfx => (p - 1, p - 1),
            OpType::Xfy => (p - 1, p),
            OpType::Yfx => (p, p - 1),
            OpType::Fy => (0, p),
            OpType::Fx => (0, p - 1),
        }
    }
}

/// 查找中缀运算符
pub fn infix(name: &str) -> Option<OpDef> {
    use OpType::*;
    let def = match name {
        ":-" | "-->" => OpDef::new(1200, Xfx),
        ";" | "|" => OpDef::new(1100, Xfy),
        "->" => OpDef::new(1050, Xfy),
        "," => OpDef::new(1000, Xfy),
        "=" | "\\=" | "==" | "\\==" | "is" | "<" | ">" | "=<" | ">=" | "=:=" | "=\\=" | "=.."
        | "@<" | "@>" | "@=<" | "@>=" => OpDef::new(700, Xfx),
        "+" | "-" => OpDef::new(500, Yfx),
        "*" | "/" | "//" | "mod" | "rem" => OpDef::new(400, Yfx),
        ":" | "^" => OpDef::new(200, Xfy),
        _ => return None,
    };
    Some(def)
}

/// 查找前缀运算符
pub fn prefix(name: &str) -> Option<OpDef> {
    use OpType::*;
    let def = match name {
        ":-" | "?-" => OpDef::new(1200, Fx),
        "dynamic" => OpDef::new(1150, Fx),
        "\\+" => OpDef::new(900, Fy),
        "-" => OpDef::new(200, Fy),
        _ => return None,
    };
    Some(def)
}

/// 是否为符号字符 (可组成符号原子)
pub fn is_symbol_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '\\' | '^' | '<' | '>' | '=' | '~' | ':' | '.' | '?' | '@' | '#'
            | '&' | '$'
    )
}
