//! 寺庙范围校验
//!
//! 寺庙管理员只能操作所属寺庙，且需持有对应权限；超级管理员不受限制。

use super::Claims;
use crate::error::ApiError;
use crate::models::{AccountType, TemplePermission};

pub struct TempleScope;

impl TempleScope {
    /// 校验账号能否以指定权限操作该寺庙
    pub fn ensure(
        claims: &Claims,
        temple_id: i64,
        permission: TemplePermission,
    ) -> Result<(), ApiError> {
        match claims.account_type {
            AccountType::SuperAdmin => Ok(()),
            AccountType::TempleAdmin => {
                if claims.temple_id != Some(temple_id) {
                    return Err(ApiError::Forbidden("无权管理此寺庙".to_string()));
                }
                if !claims.has_permission(permission.as_str()) {
                    return Err(ApiError::Forbidden(format!(
                        "缺少权限: {}",
                        permission.as_str()
                    )));
                }
                Ok(())
            }
            AccountType::Public => Err(ApiError::Forbidden("仅限寺庙管理员使用".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(account_type: AccountType, temple_id: Option<i64>, perms: &[&str]) -> Claims {
        Claims {
            sub: "1".to_string(),
            name: "admin".to_string(),
            email: "admin@temple.tw".to_string(),
            account_type,
            temple_id,
            permissions: perms.iter().map(|p| p.to_string()).collect(),
            iat: 0,
            exp: i64::MAX,
            iss: "temple-service".to_string(),
        }
    }

    #[test]
    fn test_super_admin_passes_everywhere() {
        let c = claims(AccountType::SuperAdmin, None, &[]);
        assert!(TempleScope::ensure(&c, 99, TemplePermission::ManageAdmins).is_ok());
    }

    #[test]
    fn test_temple_admin_scoped_to_own_temple() {
        let c = claims(AccountType::TempleAdmin, Some(3), &["manage_products"]);
        assert!(TempleScope::ensure(&c, 3, TemplePermission::ManageProducts).is_ok());
        assert!(matches!(
            TempleScope::ensure(&c, 4, TemplePermission::ManageProducts),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn test_temple_admin_needs_permission() {
        let c = claims(AccountType::TempleAdmin, Some(3), &["view_stats"]);
        let err = TempleScope::ensure(&c, 3, TemplePermission::ManageEvents).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(msg) if msg.contains("manage_events")));
    }

    #[test]
    fn test_public_user_rejected() {
        let c = claims(AccountType::Public, None, &[]);
        assert!(TempleScope::ensure(&c, 1, TemplePermission::ViewStats).is_err());
    }
}
