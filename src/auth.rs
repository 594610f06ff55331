// GB28181 注册 Digest 鉴权
// 三段摘要：r1 = H(user:realm:pass)，r2 = H(REGISTER:uri)，r3 = H(r1:nonce:r2)

use dashmap::DashMap;
use rand::Rng;

/// Authorization 头部的 Digest 参数
#[derive(Debug, Clone, Default)]
pub struct Authorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: String,
}

impl Authorization {
    /// 解析 Digest 参数（逗号分隔 k=v，值可带引号）
    /// 与设备实现保持宽容：缺字段不报错，留空参与校验后自然失败
    pub fn parse(value: &str) -> Self {
        let rest = value.strip_prefix("Digest ").unwrap_or(value);

        let mut auth = Authorization::default();
        for part in rest.split(',') {
            let trimmed = part.trim();
            let Some(eq_idx) = trimmed.find('=') else {
                continue;
            };
            let key = trimmed[..eq_idx].trim();
            let mut val = trimmed[eq_idx + 1..].trim();
            if val.len() >= 2 && val.starts_with('"') && val.ends_with('"') {
                val = &val[1..val.len() - 1];
            }
            match key {
                "username" => auth.username = val.to_string(),
                "realm" => auth.realm = val.to_string(),
                "nonce" => auth.nonce = val.to_string(),
                "uri" => auth.uri = val.to_string(),
                "response" => auth.response = val.to_string(),
                "algorithm" => auth.algorithm = val.to_string(),
                _ => {}
            }
        }
        auth
    }

    /// 校验客户端上报的 response
    /// 只返回最终布尔结果，不区分是哪一段摘要不匹配
    pub fn verify(&self, username: &str, password: &str, realm: &str, nonce: &str) -> bool {
        let r1 = self.digest(&format!("{}:{}:{}", username, realm, password));
        let r2 = self.digest(&format!("REGISTER:{}", self.uri));

        if r1.is_empty() || r2.is_empty() {
            tracing::error!(target: "gbsip::auth", "authorization algorithm wrong");
            return false;
        }

        let r3 = self.digest(&format!("{}:{}:{}", r1, nonce, r2));
        r3 == self.response
    }

    fn digest(&self, raw: &str) -> String {
        match self.algorithm.as_str() {
            "MD5" => format!("{:x}", md5::compute(raw)),
            // 协议固定 MD5，算法缺失或不认识时同样按 MD5 处理
            _ => format!("{:x}", md5::compute(raw)),
        }
    }
}

/// 按设备编码维护的挑战状态：nonce + 失败计数
/// 两张并发表，创建/递增/清除都是分片内原子操作
pub struct AuthChallenges {
    nonces: DashMap<String, String>,
    attempts: DashMap<String, u32>,
}

impl AuthChallenges {
    pub fn new() -> Self {
        Self {
            nonces: DashMap::new(),
            attempts: DashMap::new(),
        }
    }

    /// 下发 401 挑战时取 nonce，不存在则生成并存储
    pub fn challenge_nonce(&self, id: &str) -> String {
        self.nonces
            .entry(id.to_string())
            .or_insert_with(|| rand_num_string(32))
            .clone()
    }

    /// 校验时读取已下发的 nonce
    pub fn stored_nonce(&self, id: &str) -> Option<String> {
        self.nonces.get(id).map(|v| v.clone())
    }

    /// 带 Authorization 的注册尝试计数，返回（当前计数, 此前是否已有记录）
    pub fn register_attempt(&self, id: &str) -> (u32, bool) {
        let entry = self.attempts.entry(id.to_string());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => (*e.get(), true),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(1);
                (1, false)
            }
        }
    }

    /// 校验失败后递增计数；并发重试不会互相覆盖
    pub fn record_failure(&self, id: &str) {
        self.attempts
            .entry(id.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(2);
    }

    /// 鉴权成功或外部维护流程清除该设备的挑战状态
    pub fn clear(&self, id: &str) {
        self.nonces.remove(id);
        self.attempts.remove(id);
    }
}

impl Default for AuthChallenges {
    fn default() -> Self {
        Self::new()
    }
}

/// 定长数字随机串（nonce、SIP To-tag）
pub(crate) fn rand_num_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md5_hex(raw: &str) -> String {
        format!("{:x}", md5::compute(raw))
    }

    /// 按协议步骤构造客户端 response
    fn client_response(username: &str, password: &str, realm: &str, nonce: &str, uri: &str) -> String {
        let r1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
        let r2 = md5_hex(&format!("REGISTER:{}", uri));
        md5_hex(&format!("{}:{}:{}", r1, nonce, r2))
    }

    #[test]
    fn test_parse_digest_header() {
        let auth = Authorization::parse(
            r#"Digest username="34020000001320000001", realm="3402000000", nonce="abc123", uri="sip:34020000002000000001@3402000000", response="deadbeef", algorithm=MD5"#,
        );
        assert_eq!(auth.username, "34020000001320000001");
        assert_eq!(auth.realm, "3402000000");
        assert_eq!(auth.nonce, "abc123");
        assert_eq!(auth.response, "deadbeef");
        assert_eq!(auth.algorithm, "MD5");
    }

    #[test]
    fn test_parse_without_prefix_or_quotes() {
        let auth = Authorization::parse("username=user1,nonce=n1,response=r1");
        assert_eq!(auth.username, "user1");
        assert_eq!(auth.nonce, "n1");
        assert_eq!(auth.response, "r1");
        assert!(auth.algorithm.is_empty());
    }

    #[test]
    fn test_verify_accepts_correct_response() {
        let uri = "sip:34020000002000000001@3402000000";
        let mut auth = Authorization::parse(&format!(r#"Digest username="device", uri="{}""#, uri));
        auth.response = client_response("device", "123456", "3402000000", "nonce1", uri);
        assert!(auth.verify("device", "123456", "3402000000", "nonce1"));
    }

    #[test]
    fn test_verify_rejects_wrong_password() {
        let uri = "sip:34020000002000000001@3402000000";
        let mut auth = Authorization::parse(&format!(r#"Digest username="device", uri="{}""#, uri));
        auth.response = client_response("device", "wrong", "3402000000", "nonce1", uri);
        assert!(!auth.verify("device", "123456", "3402000000", "nonce1"));
    }

    #[test]
    fn test_verify_is_deterministic() {
        let uri = "sip:x@y";
        let mut auth = Authorization::parse(&format!("uri={}", uri));
        auth.response = client_response("u", "p", "r", "n", uri);
        for _ in 0..10 {
            assert!(auth.verify("u", "p", "r", "n"));
        }
        for _ in 0..10 {
            assert!(!auth.verify("u", "p", "r", "other-nonce"));
        }
    }

    #[test]
    fn test_unknown_algorithm_falls_back_to_md5() {
        let uri = "sip:x@y";
        let mut auth = Authorization::parse(&format!("uri={},algorithm=SHA-999", uri));
        auth.response = client_response("u", "p", "r", "n", uri);
        assert!(auth.verify("u", "p", "r", "n"));
    }

    #[test]
    fn test_challenge_nonce_is_stable_until_cleared() {
        let challenges = AuthChallenges::new();
        let n1 = challenges.challenge_nonce("dev1");
        let n2 = challenges.challenge_nonce("dev1");
        assert_eq!(n1, n2);
        assert_eq!(n1.len(), 32);
        assert!(n1.chars().all(|c| c.is_ascii_digit()));

        challenges.clear("dev1");
        assert!(challenges.stored_nonce("dev1").is_none());
    }

    #[test]
    fn test_attempt_counting() {
        let challenges = AuthChallenges::new();

        let (count, existed) = challenges.register_attempt("dev1");
        assert_eq!((count, existed), (1, false));

        challenges.record_failure("dev1");
        let (count, existed) = challenges.register_attempt("dev1");
        assert_eq!((count, existed), (2, true));

        challenges.record_failure("dev1");
        challenges.record_failure("dev1");
        let (count, _) = challenges.register_attempt("dev1");
        assert_eq!(count, 4);

        challenges.clear("dev1");
        let (count, existed) = challenges.register_attempt("dev1");
        assert_eq!((count, existed), (1, false));
    }

    #[test]
    fn test_rand_num_string() {
        let s = rand_num_string(9);
        assert_eq!(s.len(), 9);
        assert!(s.chars().all(|c| c.is_ascii_digit()));
    }
}
