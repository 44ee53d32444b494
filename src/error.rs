use std::fmt;

pub type XrResult<T> = Result<T, XrError>;

/// Error surface of every entry point. The variants map one-to-one onto the
/// result codes the ABI layer hands back to applications.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum XrError {
    /// Null handle, wrong handle kind, or a handle that is no longer live.
    HandleInvalid,
    /// Structural parameter error: null required data, unknown enum value,
    /// NaN numerics, empty required arrays.
    ValidationFailure(&'static str),
    /// Quaternion off-unit by more than 1%, or a non-finite position.
    PoseInvalid,
    /// Frame pacing, session begin/end, or swapchain acquire/wait/release
    /// used out of order.
    CallOrderInvalid,
    TimeInvalid,
    SessionNotRunning,
    SessionRunning,
    SessionNotReady,
    SessionNotStopping,
    ActionsetNotAttached,
    ActionsetsAlreadyAttached,
    ActionTypeMismatch,
    NameDuplicated,
    NameInvalid,
    PathFormatInvalid,
    PathInvalid,
    PathUnsupported,
    /// Two-call pattern buffer too small for the full result.
    SizeInsufficient,
    LayerInvalid(&'static str),
    SwapchainRectInvalid,
    EnvironmentBlendModeUnsupported,
    ViewConfigurationUnsupported,
    ReferenceSpaceUnsupported,
    GraphicsDeviceInvalid,
    FormFactorUnsupported,
    /// Child slot table full.
    LimitReached,
    TimeoutExpired,
    /// The compositor connection died; the instance is unusable.
    InstanceLost,
    /// Internal invariant violation. Seeing one of these is a bug.
    RuntimeFailure(&'static str),
}

impl fmt::Display for XrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandleInvalid => f.write_str("handle invalid"),
            Self::ValidationFailure(what) => write!(f, "validation failure: {what}"),
            Self::PoseInvalid => f.write_str("pose invalid"),
            Self::CallOrderInvalid => f.write_str("call order invalid"),
            Self::TimeInvalid => f.write_str("time invalid"),
            Self::SessionNotRunning => f.write_str("session not running"),
            Self::SessionRunning => f.write_str("session already running"),
            Self::SessionNotReady => f.write_str("session not ready"),
            Self::SessionNotStopping => f.write_str("session not stopping"),
            Self::ActionsetNotAttached => f.write_str("action set not attached"),
            Self::ActionsetsAlreadyAttached => f.write_str("action sets already attached"),
            Self::ActionTypeMismatch => f.write_str("action type mismatch"),
            Self::NameDuplicated => f.write_str("name duplicated"),
            Self::NameInvalid => f.write_str("name invalid"),
            Self::PathFormatInvalid => f.write_str("path format invalid"),
            Self::PathInvalid => f.write_str("path invalid"),
            Self::PathUnsupported => f.write_str("path unsupported"),
            Self::SizeInsufficient => f.write_str("size insufficient"),
            Self::LayerInvalid(what) => write!(f, "layer invalid: {what}"),
            Self::SwapchainRectInvalid => f.write_str("swapchain rect invalid"),
            Self::EnvironmentBlendModeUnsupported => {
                f.write_str("environment blend mode unsupported")
            }
            Self::ViewConfigurationUnsupported => f.write_str("view configuration unsupported"),
            Self::ReferenceSpaceUnsupported => f.write_str("reference space unsupported"),
            Self::GraphicsDeviceInvalid => f.write_str("graphics device invalid"),
            Self::FormFactorUnsupported => f.write_str("form factor unsupported"),
            Self::LimitReached => f.write_str("limit reached"),
            Self::TimeoutExpired => f.write_str("timeout expired"),
            Self::InstanceLost => f.write_str("instance lost"),
            Self::RuntimeFailure(what) => write!(f, "runtime failure: {what}"),
        }
    }
}

impl std::error::Error for XrError {}
