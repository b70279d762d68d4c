//! 账户/会话上下文

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 不透明的账户上下文
///
/// 同步核心只负责把它原样传给差异生成器和传输执行器，从不读取其中内容。
/// 具体执行器可以通过 [`AccountContext::downcast_ref`] 取回自己的会话类型。
#[derive(Clone, Default)]
pub struct AccountContext {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl AccountContext {
    pub fn new<T: Any + Send + Sync>(session: T) -> Self {
        Self {
            inner: Some(Arc::new(session)),
        }
    }

    /// 不携带任何会话（本地或内存存储不需要）
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for AccountContext {
    // 不输出会话内容，避免凭据进入日志
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountContext")
            .field("present", &self.inner.is_some())
            .finish()
    }
}
