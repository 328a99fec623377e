use super::{
    ByteStream, FileMeta, Storage, WalkEntry, WalkStream, COPY_CHUNK_SIZE, DIR_MODE,
    WALK_CHANNEL_CAPACITY,
};
use crate::config::ConnectionConfig;
use crate::error::SyncError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use ssh2::{CheckResult, ErrorCode, FileStat, KnownHostFileKind, Session, Sftp};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// 建立 TCP 连接的超时
const CONNECT_TIMEOUT_SECS: u64 = 90;
/// SFTP 协议中 "文件不存在" 的状态码
const SFTP_NO_SUCH_FILE: i32 = 2;
/// 读取流的通道容量（块数）
const READ_CHANNEL_CAPACITY: usize = 4;

/// 通过 SFTP 访问的远程文件系统
///
/// 所有请求共用一个 SSH 会话，libssh2 内部对并发请求加锁串行化，
/// 因此多个映射可以同时在同一连接上枚举和传输。
pub struct SftpStorage {
    sftp: Arc<Sftp>,
    // 会话需要与 sftp 句柄同生命周期
    _session: Session,
    name: String,
}

impl SftpStorage {
    /// 连接并认证（阻塞调用，应放在 spawn_blocking 中执行）
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let host = config.hostname.clone();
        let addr = format!("{}:{}", config.hostname, config.port);
        let connection_error = |message: String| SyncError::Connection {
            host: addr.clone(),
            message,
        };

        let socket_addr = std::net::ToSocketAddrs::to_socket_addrs(&addr)
            .map_err(|e| connection_error(e.to_string()))?
            .next()
            .ok_or_else(|| connection_error("无法解析主机地址".to_string()))?;

        let tcp = TcpStream::connect_timeout(&socket_addr, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .map_err(|e| connection_error(e.to_string()))?;

        let mut session = Session::new().map_err(|e| connection_error(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connection_error(format!("SSH 握手失败: {}", e)))?;

        Self::verify_host_key(&session, config)?;
        Self::authenticate(&session, config)?;

        let sftp = session
            .sftp()
            .map_err(|e| connection_error(format!("无法启动 SFTP 子系统: {}", e)))?;

        info!("已连接 SFTP: {}@{}", config.username, addr);

        Ok(Self {
            sftp: Arc::new(sftp),
            _session: session,
            name: format!("sftp://{}@{}", config.username, host),
        })
    }

    fn verify_host_key(session: &Session, config: &ConnectionConfig) -> Result<()> {
        let host_key_error = |message: String| SyncError::HostKey {
            host: config.hostname.clone(),
            message,
        };

        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| host_key_error(e.to_string()))?;
        known_hosts
            .read_file(&config.known_hosts, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                host_key_error(format!(
                    "无法读取 known_hosts 文件 '{}': {}",
                    config.known_hosts.display(),
                    e
                ))
            })?;

        let (key, _) = session
            .host_key()
            .ok_or_else(|| host_key_error("服务器未提供主机密钥".to_string()))?;

        match known_hosts.check_port(&config.hostname, config.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => Err(host_key_error("主机不在 known_hosts 中".to_string()).into()),
            CheckResult::Mismatch => Err(host_key_error("主机密钥不匹配".to_string()).into()),
            CheckResult::Failure => Err(host_key_error("校验过程出错".to_string()).into()),
        }
    }

    /// 依次尝试 agent、密码、私钥文件
    fn authenticate(session: &Session, config: &ConnectionConfig) -> Result<()> {
        let user = config.username.as_str();

        if let Err(e) = session.userauth_agent(user) {
            debug!("agent 认证失败: {}", e);
        }

        if !session.authenticated() {
            if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
                if let Err(e) = session.userauth_password(user, password) {
                    debug!("密码认证失败: {}", e);
                }
            }
        }

        if !session.authenticated() {
            if let Some(identity) = config.identity.as_deref() {
                if let Err(e) = session.userauth_pubkey_file(user, None, identity, None) {
                    debug!("私钥认证失败 ({}): {}", identity.display(), e);
                }
            }
        }

        if !session.authenticated() {
            return Err(SyncError::Auth {
                user: user.to_string(),
                host: config.hostname.clone(),
            }
            .into());
        }

        Ok(())
    }

    fn meta_of(path: &str, stat: Result<FileStat, ssh2::Error>) -> Result<Option<FileMeta>> {
        match stat {
            Ok(stat) => Ok(Some(FileMeta {
                is_dir: stat.is_dir(),
            })),
            Err(e) if Self::is_not_found(&e) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("无法获取 'remote:{}' 的状态: {}", path, e)),
        }
    }

    fn is_not_found(err: &ssh2::Error) -> bool {
        matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
    }

    /// 在阻塞线程上执行一次 SFTP 调用
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    {
        let sftp = self.sftp.clone();
        tokio::task::spawn_blocking(move || f(&sftp)).await?
    }
}

#[async_trait]
impl Storage for SftpStorage {
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        let path = path.to_string();
        self.blocking(move |sftp| Self::meta_of(&path, sftp.lstat(Path::new(&path))))
            .await
    }

    async fn stat_follow(&self, path: &str) -> Result<Option<FileMeta>> {
        let path = path.to_string();
        self.blocking(move |sftp| Self::meta_of(&path, sftp.stat(Path::new(&path))))
            .await
    }

    async fn canonicalize(&self, path: &str) -> Result<String> {
        let path = path.to_string();
        self.blocking(move |sftp| {
            let resolved = sftp
                .realpath(Path::new(&path))
                .with_context(|| format!("无法解析 'remote:{}'", path))?;
            Ok(resolved.to_string_lossy().into_owned())
        })
        .await
    }

    fn walk(&self, root: &str) -> WalkStream {
        let (tx, rx) = mpsc::channel(WALK_CHANNEL_CAPACITY);
        let sftp = self.sftp.clone();
        let root = root.to_string();

        tokio::task::spawn_blocking(move || {
            let root_entry = sftp
                .lstat(Path::new(&root))
                .map(|stat| WalkEntry {
                    path: root.clone(),
                    is_dir: stat.is_dir(),
                })
                .map_err(|e| anyhow::anyhow!("无法获取 'remote:{}' 的状态: {}", root, e));

            let root_is_dir = matches!(&root_entry, Ok(entry) if entry.is_dir);
            if tx.blocking_send(root_entry).is_err() || !root_is_dir {
                return;
            }
            walk_subtree(&sftp, Path::new(&root), &tx);
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn open_read(&self, path: &str) -> Result<ByteStream> {
        let owned = path.to_string();
        let mut file = self
            .blocking(move |sftp| {
                sftp.open(Path::new(&owned))
                    .with_context(|| format!("无法打开文件 'remote:{}'", owned))
            })
            .await?;

        let (tx, rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; COPY_CHUNK_SIZE];
            loop {
                let item = match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => Err(anyhow::Error::new(e).context(format!("读取 'remote:{}' 失败", path))),
                };
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() || failed {
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn write_stream(&self, path: &str, stream: ByteStream) -> Result<u64> {
        let owned = path.to_string();
        let file = self
            .blocking(move |sftp| {
                sftp.create(Path::new(&owned))
                    .with_context(|| format!("无法创建文件 'remote:{}'", owned))
            })
            .await?;

        let (mut file, written) = pump_blocking(file, stream, path).await?;

        let owned = path.to_string();
        tokio::task::spawn_blocking(move || {
            file.close()
                .with_context(|| format!("关闭 'remote:{}' 失败", owned))
        })
        .await??;

        Ok(written)
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()> {
        let path = path.to_string();
        self.blocking(move |sftp| {
            let stat = FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(mode),
                atime: None,
                mtime: None,
            };
            sftp.setstat(Path::new(&path), stat)
                .with_context(|| format!("无法设置 'remote:{}' 的权限", path))
        })
        .await
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.blocking(move |sftp| match sftp.mkdir(Path::new(&path), DIR_MODE as i32) {
            Ok(()) => Ok(()),
            // mkdir 对已存在的目录返回通用失败码，需要再确认一次
            Err(e) => match sftp.stat(Path::new(&path)) {
                Ok(stat) if stat.is_dir() => Ok(()),
                _ => Err(anyhow::anyhow!("无法创建目录 'remote:{}': {}", path, e)),
            },
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 把字节流逐块写入阻塞式写入端
///
/// 写入端只在阻塞线程上使用和释放：ssh2 的文件句柄在 drop 时会同步关闭远程句柄。
async fn pump_blocking<W>(mut writer: W, mut stream: ByteStream, path: &str) -> Result<(W, u64)>
where
    W: Write + Send + 'static,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                release_blocking(writer).await;
                return Err(e);
            }
        };
        let len = chunk.len() as u64;
        let owned = path.to_string();
        writer = tokio::task::spawn_blocking(move || {
            writer
                .write_all(&chunk)
                .with_context(|| format!("写入 'remote:{}' 失败", owned))?;
            Ok::<_, anyhow::Error>(writer)
        })
        .await??;
        written += len;
    }
    Ok((writer, written))
}

/// 在阻塞线程上释放句柄
async fn release_blocking<T: Send + 'static>(handle: T) {
    let _ = tokio::task::spawn_blocking(move || drop(handle)).await;
}

/// 深度优先展开 `dir` 下的所有条目，接收端关闭时返回 false
fn walk_subtree(sftp: &Sftp, dir: &Path, tx: &mpsc::Sender<Result<WalkEntry>>) -> bool {
    let mut children = match sftp.readdir(dir) {
        Ok(children) => children,
        Err(e) => {
            let err = anyhow::anyhow!("无法读取目录 'remote:{}': {}", dir.display(), e);
            return tx.blocking_send(Err(err)).is_ok();
        }
    };
    children.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, stat) in children {
        let is_dir = stat.is_dir();
        let entry = WalkEntry {
            path: path.to_string_lossy().into_owned(),
            is_dir,
        };
        if tx.blocking_send(Ok(entry)).is_err() {
            return false;
        }
        if is_dir && !walk_subtree(sftp, &path, tx) {
            return false;
        }
    }

    true
}
