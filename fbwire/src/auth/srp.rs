//! SRP, Secure Remote Password, with Firebird group parameters.
//!
//! Every variant shares the SHA-1 based key derivation, only the hash of the client proof
//! differs.
//!
//! Server data layout:
//!
//! ```text
//! ┏━━━━━━━━━━┳━━━━━━━━━━━┳━━━━━━━━━━┳━━━━━━━━━━━━━━━┓
//! ┃ Salt len ┃   Salt    ┃ Key len  ┃ Public key B  ┃
//! ┣━━━━━━━━━━╋━━━━━━━━━━━╋━━━━━━━━━━╋━━━━━━━━━━━━━━━┫
//! ┃  u16 le  ┃   [u8]    ┃  u16 le  ┃      hex      ┃
//! ┗━━━━━━━━━━┻━━━━━━━━━━━┻━━━━━━━━━━┻━━━━━━━━━━━━━━━┛
//! ```
use bytes::Bytes;
use num_bigint::BigUint;
use sha1::{Digest, Sha1};
use sha2::{Sha224, Sha256, Sha384, Sha512};
use std::sync::LazyLock;

use super::{AuthError, AuthPlugin, AuthStatus, Credentials};

const PRIME_HEX: &[u8] = b"E67D2E994B2F900C3F41F08F5BB2627ED0D49EE1FE767A52EFCD565CD6E768812C3E1E9CE8F0A8BEA6CB13CD29DDEBF7A96D4A93B55D488DF099A15C89DCB0640738EB2CBDD9A8F7BAB561AB1B0DC1C6CDABF303264A08D1BCA932D1F1EE428B619D970F342ABA9A65793B8B2F041AE5364350C16F735F56ECBCA87BD57B29E7";

const MULTIPLIER: &[u8] = b"1277432915985975349439481660349303019122249719989";

const GENERATOR: u32 = 2;

/// Group constants.
struct Group {
    n: BigUint,
    g: BigUint,
    k: BigUint,
}

static GROUP: LazyLock<Group> = LazyLock::new(|| Group {
    n: BigUint::parse_bytes(PRIME_HEX, 16).unwrap_or_default(),
    g: BigUint::from(GENERATOR),
    k: BigUint::parse_bytes(MULTIPLIER, 10).unwrap_or_default(),
});

/// Hash of the client proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SrpHash {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl SrpHash {
    /// Every variant, in registry order.
    pub const ALL: [SrpHash; 5] = [Self::Sha1, Self::Sha224, Self::Sha256, Self::Sha384, Self::Sha512];

    /// Hash by algorithm name, such as `SHA-256`.
    ///
    /// # Errors
    ///
    /// Unknown name is [`AuthError::UnsupportedHash`].
    pub fn from_name(name: &str) -> Result<SrpHash, AuthError> {
        match name.to_ascii_uppercase().as_str() {
            "SHA-1" | "SHA1" => Ok(Self::Sha1),
            "SHA-224" | "SHA224" => Ok(Self::Sha224),
            "SHA-256" | "SHA256" => Ok(Self::Sha256),
            "SHA-384" | "SHA384" => Ok(Self::Sha384),
            "SHA-512" | "SHA512" => Ok(Self::Sha512),
            _ => Err(AuthError::UnsupportedHash(name.to_owned())),
        }
    }

    /// Name of the plugin using this hash.
    pub fn plugin_name(self) -> &'static str {
        match self {
            Self::Sha1 => "Srp",
            Self::Sha224 => "Srp224",
            Self::Sha256 => "Srp256",
            Self::Sha384 => "Srp384",
            Self::Sha512 => "Srp512",
        }
    }

    /// Plugin factory of this hash.
    pub fn factory(self) -> fn() -> Box<dyn AuthPlugin> {
        match self {
            Self::Sha1 => || Box::new(SrpClient::new(SrpHash::Sha1)) as Box<dyn AuthPlugin>,
            Self::Sha224 => || Box::new(SrpClient::new(SrpHash::Sha224)) as Box<dyn AuthPlugin>,
            Self::Sha256 => || Box::new(SrpClient::new(SrpHash::Sha256)) as Box<dyn AuthPlugin>,
            Self::Sha384 => || Box::new(SrpClient::new(SrpHash::Sha384)) as Box<dyn AuthPlugin>,
            Self::Sha512 => || Box::new(SrpClient::new(SrpHash::Sha512)) as Box<dyn AuthPlugin>,
        }
    }

    fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha1 => digest::<Sha1>(parts),
            Self::Sha224 => digest::<Sha224>(parts),
            Self::Sha256 => digest::<Sha256>(parts),
            Self::Sha384 => digest::<Sha384>(parts),
            Self::Sha512 => digest::<Sha512>(parts),
        }
    }
}

fn digest<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn sha1(parts: &[&[u8]]) -> Vec<u8> {
    digest::<Sha1>(parts)
}

fn sha1_int(parts: &[&[u8]]) -> BigUint {
    BigUint::from_bytes_be(&sha1(parts))
}

/// Big endian bytes without leading zeros.
fn bytes(n: &BigUint) -> Vec<u8> {
    n.to_bytes_be()
}

/// `x = H(salt, H(USER ":" password))`
fn user_hash(login: &str, password: &str, salt: &[u8]) -> BigUint {
    let inner = sha1(&[login.as_bytes(), b":", password.as_bytes()]);
    sha1_int(&[salt, &inner])
}

/// `u = H(A, B)`
fn scramble(public_a: &BigUint, public_b: &BigUint) -> BigUint {
    sha1_int(&[&bytes(public_a), &bytes(public_b)])
}

/// `K = H(S)`
fn session_key(secret: &BigUint) -> Vec<u8> {
    sha1(&[&bytes(secret)])
}

/// `M = H(H(N)^H(g) mod N, H(USER), salt, A, B, K)`
///
/// `H(USER)` goes through an integer, dropping leading zero bytes. `K` is the raw digest.
fn client_proof(
    hash: SrpHash,
    login: &str,
    salt: &[u8],
    public_a: &BigUint,
    public_b: &BigUint,
    key: &[u8],
) -> Vec<u8> {
    let group = &*GROUP;
    let n1 = sha1_int(&[&bytes(&group.n)]);
    let n2 = sha1_int(&[&bytes(&group.g)]);
    let n1 = n1.modpow(&n2, &group.n);
    let user = sha1_int(&[login.as_bytes()]);
    hash.digest(&[&bytes(&n1), &bytes(&user), salt, &bytes(public_a), &bytes(public_b), key])
}

/// Decode server data into salt and public key.
fn parse_server_data(data: &[u8]) -> Result<(&[u8], BigUint), AuthError> {
    fn split_u16(data: &[u8]) -> Result<(&[u8], &[u8]), AuthError> {
        let [lo, hi, rest @ ..] = data else {
            return Err(AuthError::MalformedServerData("missing length"));
        };
        let len = usize::from(u16::from_le_bytes([*lo, *hi]));
        if len > rest.len() {
            return Err(AuthError::MalformedServerData("length exceeds data"));
        }
        Ok(rest.split_at(len))
    }

    let (salt, rest) = split_u16(data)?;
    let (key, _) = split_u16(rest)?;
    let key = BigUint::parse_bytes(key, 16)
        .ok_or(AuthError::MalformedServerData("public key is not hex"))?;
    Ok((salt, key))
}

/// Client side of SRP.
pub struct SrpClient {
    hash: SrpHash,
    private_key: BigUint,
    public_key: BigUint,
    client_data: Option<Bytes>,
    server_data: Option<Bytes>,
    session_key: Option<Vec<u8>>,
}

impl SrpClient {
    /// Create client with random private key.
    pub fn new(hash: SrpHash) -> Self {
        Self::with_private_key(hash, BigUint::from_bytes_be(&rand::random::<[u8; 16]>()))
    }

    /// Create client by hash algorithm name.
    ///
    /// # Errors
    ///
    /// Unknown hash is [`AuthError::UnsupportedHash`].
    pub fn with_hash_name(name: &str) -> Result<Self, AuthError> {
        Ok(Self::new(SrpHash::from_name(name)?))
    }

    pub(crate) fn with_private_key(hash: SrpHash, private_key: BigUint) -> Self {
        let group = &*GROUP;
        let public_key = group.g.modpow(&private_key, &group.n);
        Self { hash, private_key, public_key, client_data: None, server_data: None, session_key: None }
    }

    /// Public key `A` as hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(bytes(&self.public_key))
    }

    /// Compute session key and client proof from server data.
    fn proof(&mut self, login: &str, password: &str, server_data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let group = &*GROUP;
        let (salt, public_b) = parse_server_data(server_data)?;

        let u = scramble(&self.public_key, &public_b);
        let x = user_hash(login, password, salt);
        let gx = group.g.modpow(&x, &group.n);
        let kgx = (&group.k * gx) % &group.n;
        let diff = ((&public_b % &group.n) + &group.n - kgx) % &group.n;
        let exponent = &self.private_key + u * x;
        let secret = diff.modpow(&exponent, &group.n);

        let key = session_key(&secret);
        let proof = client_proof(self.hash, login, salt, &self.public_key, &public_b, &key);
        self.session_key = Some(key);
        Ok(proof)
    }
}

impl AuthPlugin for SrpClient {
    fn name(&self) -> &'static str {
        self.hash.plugin_name()
    }

    fn authenticate(&mut self, credentials: &Credentials) -> Result<AuthStatus, AuthError> {
        if self.session_key.is_some() {
            return Err(AuthError::SyncFailure);
        }

        let (Some(login), Some(password)) = (credentials.normalized_login(), credentials.password()) else {
            return Ok(AuthStatus::AuthContinue);
        };

        let Some(server_data) = self.server_data.clone().filter(|d| !d.is_empty()) else {
            self.client_data = Some(Bytes::from(self.public_key_hex()));
            return Ok(AuthStatus::AuthMoreData);
        };

        let proof = self.proof(login, password, &server_data)?;
        self.client_data = Some(Bytes::from(hex::encode_upper(proof)));
        Ok(AuthStatus::AuthSuccess)
    }

    fn client_data(&self) -> Option<&[u8]> {
        self.client_data.as_deref()
    }

    fn set_server_data(&mut self, data: Bytes) {
        self.server_data = Some(data);
    }

    fn has_server_data(&self) -> bool {
        self.server_data.as_ref().is_some_and(|d| !d.is_empty())
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }
}

impl std::fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpClient")
            .field("hash", &self.hash)
            .field("has_session_key", &self.session_key.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Server side of SRP, for exchange tests.
    pub(crate) struct SrpServer {
        hash: SrpHash,
        login: String,
        salt: Vec<u8>,
        verifier: BigUint,
        private_key: BigUint,
        public_key: BigUint,
    }

    impl SrpServer {
        pub(crate) fn new(hash: SrpHash, login: &str, password: &str, salt: &[u8]) -> Self {
            let private_key = BigUint::from_bytes_be(&rand::random::<[u8; 16]>());
            Self::with_private_key(hash, login, password, salt, private_key)
        }

        pub(crate) fn with_private_key(
            hash: SrpHash,
            login: &str,
            password: &str,
            salt: &[u8],
            private_key: BigUint,
        ) -> Self {
            let group = &*GROUP;
            let x = user_hash(login, password, salt);
            let verifier = group.g.modpow(&x, &group.n);
            let public_key = (&group.k * &verifier + group.g.modpow(&private_key, &group.n)) % &group.n;
            Self { hash, login: login.to_owned(), salt: salt.to_vec(), verifier, private_key, public_key }
        }

        /// Data sent in `op_cont_auth` or `op_cond_accept`.
        pub(crate) fn server_data(&self) -> Vec<u8> {
            let key = hex::encode_upper(bytes(&self.public_key));
            let mut data = vec![];
            data.extend_from_slice(&(self.salt.len() as u16).to_le_bytes());
            data.extend_from_slice(&self.salt);
            data.extend_from_slice(&(key.len() as u16).to_le_bytes());
            data.extend_from_slice(key.as_bytes());
            data
        }

        /// Derive session key from client public key hex, then check the client proof hex.
        pub(crate) fn verify(&self, client_public: &[u8], proof: &[u8]) -> Option<Vec<u8>> {
            let group = &*GROUP;
            let public_a = BigUint::parse_bytes(client_public, 16)?;
            let u = scramble(&public_a, &self.public_key);
            let base = (&public_a * self.verifier.modpow(&u, &group.n)) % &group.n;
            let secret = base.modpow(&self.private_key, &group.n);
            let key = session_key(&secret);

            let expected = client_proof(self.hash, &self.login, &self.salt, &public_a, &self.public_key, &key);
            (hex::decode(proof).ok()? == expected).then_some(key)
        }
    }

    fn credentials() -> Credentials {
        Credentials::new(Some("sysdba".into()), Some("masterkey".into()))
    }

    #[test]
    fn key_agreement() {
        for hash in SrpHash::ALL {
            let server = SrpServer::new(hash, "SYSDBA", "masterkey", b"0123456789abcdef");
            let mut client = SrpClient::new(hash);

            assert_eq!(client.authenticate(&credentials()).unwrap(), AuthStatus::AuthMoreData);
            let public = client.client_data().unwrap().to_vec();
            assert!(client.session_key().is_none());

            client.set_server_data(Bytes::from(server.server_data()));
            assert!(client.has_server_data());
            assert_eq!(client.authenticate(&credentials()).unwrap(), AuthStatus::AuthSuccess);

            let proof = client.client_data().unwrap();
            let server_key = server.verify(&public, proof).expect("proof mismatch");
            assert_eq!(client.session_key(), Some(&server_key[..]));
        }
    }

    #[test]
    fn wrong_password_proof_differs() {
        let server = SrpServer::new(SrpHash::Sha256, "SYSDBA", "other", b"salt");
        let mut client = SrpClient::new(SrpHash::Sha256);
        client.authenticate(&credentials()).unwrap();
        let public = client.client_data().unwrap().to_vec();
        client.set_server_data(Bytes::from(server.server_data()));
        client.authenticate(&credentials()).unwrap();
        assert!(server.verify(&public, client.client_data().unwrap()).is_none());
    }

    #[test]
    fn sync_failure_after_key() {
        let server = SrpServer::new(SrpHash::Sha1, "SYSDBA", "masterkey", b"salt");
        let mut client = SrpClient::new(SrpHash::Sha1);
        client.authenticate(&credentials()).unwrap();
        client.set_server_data(Bytes::from(server.server_data()));
        client.authenticate(&credentials()).unwrap();
        let key = client.session_key().unwrap().to_vec();

        assert!(matches!(client.authenticate(&credentials()), Err(AuthError::SyncFailure)));
        assert_eq!(client.session_key(), Some(&key[..]));
    }

    #[test]
    fn continue_without_password() {
        let mut client = SrpClient::new(SrpHash::Sha256);
        let credentials = Credentials::new(Some("sysdba".into()), None);
        assert_eq!(client.authenticate(&credentials).unwrap(), AuthStatus::AuthContinue);
        assert!(client.client_data().is_none());
    }

    #[test]
    fn unsupported_hash_at_construction() {
        assert!(matches!(SrpClient::with_hash_name("SHA-999"), Err(AuthError::UnsupportedHash(_))));
        assert_eq!(SrpClient::with_hash_name("sha-384").unwrap().name(), "Srp384");
    }

    #[test]
    fn malformed_server_data() {
        let mut client = SrpClient::new(SrpHash::Sha1);
        client.authenticate(&credentials()).unwrap();
        client.set_server_data(Bytes::from_static(b"\x04\0ab"));
        assert!(matches!(
            client.authenticate(&credentials()),
            Err(AuthError::MalformedServerData(_))
        ));

        client.set_server_data(Bytes::from_static(b"\x01\0a\x02\0zz"));
        assert!(matches!(
            client.authenticate(&credentials()),
            Err(AuthError::MalformedServerData(_))
        ));
    }

    /// Login whose SHA-1 starts with a zero byte, with keys that give a session key
    /// starting with a zero byte.
    fn fixed_exchange(hash: SrpHash) -> (SrpServer, SrpClient) {
        let salt: Vec<u8> = (0..32).collect();
        let server = SrpServer::with_private_key(
            hash,
            "USER171",
            "masterkey",
            &salt,
            BigUint::from(0x1234_5678_90ab_cdef_u64),
        );
        let client = SrpClient::with_private_key(hash, BigUint::from(289u32));
        (server, client)
    }

    #[test]
    fn fixed_vector_proof() {
        let credentials = Credentials::new(Some("USER171".into()), Some("masterkey".into()));
        let expected = [
            (SrpHash::Sha1, "CF8E14514A6A3E92D6EEF4E13BD1C46983C16C12"),
            (SrpHash::Sha256, "0FD6D3E47BA0A5320C83317F7B5EE703E7E900960B8C1DE260F8AEFFD4A0FF02"),
        ];
        for (hash, proof) in expected {
            let (server, mut client) = fixed_exchange(hash);
            client.authenticate(&credentials).unwrap();
            let public = client.client_data().unwrap().to_vec();
            client.set_server_data(Bytes::from(server.server_data()));
            assert_eq!(client.authenticate(&credentials).unwrap(), AuthStatus::AuthSuccess);
            assert_eq!(client.client_data().unwrap(), proof.as_bytes());
            assert!(server.verify(&public, proof.as_bytes()).is_some());
        }
    }

    #[test]
    fn session_key_keeps_leading_zero() {
        let credentials = Credentials::new(Some("USER171".into()), Some("masterkey".into()));
        let (server, mut client) = fixed_exchange(SrpHash::Sha1);
        client.authenticate(&credentials).unwrap();
        client.set_server_data(Bytes::from(server.server_data()));
        client.authenticate(&credentials).unwrap();

        let key = client.session_key().unwrap();
        assert_eq!(key.len(), 20);
        assert_eq!(hex::encode(key), "009a5c4dc140ee76733ca738fd7da356321c0f9d");
    }

    #[test]
    fn user_hash_drops_leading_zero() {
        assert_eq!(sha1(&[b"USER171"])[0], 0);
        let key = [0u8; 20];
        let (a, b) = (BigUint::from(2u32), BigUint::from(3u32));
        let stripped = sha1_int(&[b"USER171"]).to_bytes_be();
        assert_eq!(stripped.len(), 19);

        let n1 = sha1_int(&[&bytes(&GROUP.n)]).modpow(&sha1_int(&[&bytes(&GROUP.g)]), &GROUP.n);
        let expected = sha1(&[&bytes(&n1), &stripped, b"salt", &[2], &[3], &key]);
        assert_eq!(client_proof(SrpHash::Sha1, "USER171", b"salt", &a, &b, &key), expected);
    }

    #[test]
    fn public_key_is_deterministic_for_private_key() {
        let a = SrpClient::with_private_key(SrpHash::Sha1, BigUint::from(1u32));
        assert_eq!(a.public_key_hex(), "02");
    }
}
