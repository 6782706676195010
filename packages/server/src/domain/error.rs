//! Error types for the chat core.

use thiserror::Error;

use super::ConnectionId;

/// Errors raised while handling one connection's inbound event.
///
/// The `Display` text of every client-caused variant is the exact `message`
/// sent back to the originating connection in an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Formato de mensaje inválido")]
    Parse,

    #[error("{0}")]
    Validation(ValidationIssue),

    #[error("{0}")]
    UsernameInvalid(UsernameIssue),

    #[error("Este nombre de usuario ya está en uso")]
    UsernameTaken,

    #[error("Ya te has unido al chat")]
    AlreadyJoined,

    #[error("Debes unirte al chat primero")]
    NotJoined,

    #[error("El mensaje no puede estar vacío")]
    ContentTooShort,

    #[error("El mensaje no puede superar los {max} caracteres")]
    ContentTooLong { max: usize },

    #[error("Límite de mensajes excedido, intenta de nuevo en {reset_in}s")]
    RateLimitExceeded { reset_in: u64 },

    #[error("Tipo de mensaje no soportado: {0}")]
    UnsupportedType(String),

    /// Unexpected fault. The detail is logged, never sent to clients.
    #[error("Error interno del servidor")]
    Internal(String),
}

impl ChatError {
    /// Short machine-friendly name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse => "parse_error",
            Self::Validation(_) => "validation_error",
            Self::UsernameInvalid(_) => "username_invalid",
            Self::UsernameTaken => "username_taken",
            Self::AlreadyJoined => "already_joined",
            Self::NotJoined => "not_joined",
            Self::ContentTooShort => "content_too_short",
            Self::ContentTooLong { .. } => "content_too_long",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the error was caused by the client (as opposed to the server).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

/// Why a structurally valid JSON payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("Tipo de mensaje no especificado")]
    MissingType,

    #[error("Campos del mensaje inválidos")]
    InvalidFields,
}

/// Why a display name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsernameIssue {
    #[error("El nombre de usuario debe tener entre {min} y {max} caracteres")]
    Length { min: usize, max: usize },

    #[error(
        "El nombre de usuario solo puede contener letras, números, espacios, guiones y guiones bajos"
    )]
    Characters,
}

/// Errors returned by the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    #[error("name '{0}' is already taken")]
    NameTaken(String),
}

impl From<RegistryError> for ChatError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NameTaken(_) => ChatError::UsernameTaken,
            RegistryError::NotFound(id) => {
                ChatError::Internal(format!("connection {} vanished mid-request", id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_facing_messages() {
        // テスト項目: クライアント向けエラーメッセージが仕様どおりの文言になる
        // given (前提条件):
        let taken = ChatError::UsernameTaken;
        let not_joined = ChatError::NotJoined;
        let rate = ChatError::RateLimitExceeded { reset_in: 42 };

        // when (操作):
        let taken_text = taken.to_string();
        let not_joined_text = not_joined.to_string();
        let rate_text = rate.to_string();

        // then (期待する結果):
        assert_eq!(taken_text, "Este nombre de usuario ya está en uso");
        assert_eq!(not_joined_text, "Debes unirte al chat primero");
        assert!(rate_text.contains("42s"));
    }

    #[test]
    fn test_internal_error_hides_detail() {
        // テスト項目: 内部エラーの詳細はクライアント向け文言に含まれない
        // given (前提条件):
        let err = ChatError::Internal("serde exploded".to_string());

        // when (操作):
        let text = err.to_string();

        // then (期待する結果):
        assert_eq!(text, "Error interno del servidor");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_registry_error_conversion() {
        // テスト項目: RegistryError が ChatError に正しく変換される
        // given (前提条件):
        let taken = RegistryError::NameTaken("Ana".to_string());
        let missing = RegistryError::NotFound(ConnectionId::new(7));

        // when (操作):
        let taken: ChatError = taken.into();
        let missing: ChatError = missing.into();

        // then (期待する結果):
        assert_eq!(taken, ChatError::UsernameTaken);
        assert_eq!(missing.kind(), "internal_error");
    }
}
