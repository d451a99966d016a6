//! Route management
//!
//! Routes the client installs around the tunnel: a host route pinning the
//! server behind the pre-existing default gateway, the classic def1 pair
//! (`0.0.0.0/1` + `128.0.0.0/1`) that overrides the default route without
//! deleting it, and the virtual subnet route. Uses the `net-route` crate
//! for the actual table manipulation.

use std::ffi::CString;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{Error, Result};

/// Convert an interface name to its index
fn get_interface_index(name: &str) -> Result<u32> {
    let c_name =
        CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;

    // SAFETY: if_nametoindex is safe to call with a valid C string
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(Error::Route(format!("interface '{}' not found", name)));
    }

    Ok(index)
}

/// A network route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: IpNet,
    /// Gateway address (None for direct/interface routes)
    pub gateway: Option<IpAddr>,
    /// Interface name, resolved to an index when the route is applied
    pub interface: Option<String>,
    /// Explicit interface index, preferred over `interface` when set
    pub ifindex: Option<u32>,
}

impl Route {
    /// Create a route to a destination network via a gateway
    pub fn new(destination: IpNet, gateway: IpAddr) -> Self {
        Self {
            destination,
            gateway: Some(gateway),
            interface: None,
            ifindex: None,
        }
    }

    /// Create an interface route (no gateway, traffic goes directly to
    /// the interface)
    pub fn interface_route(destination: IpNet, interface: impl Into<String>) -> Self {
        Self {
            destination,
            gateway: None,
            interface: Some(interface.into()),
            ifindex: None,
        }
    }

    /// Set an explicit interface index
    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    /// Check if this is a default route
    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(ref gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(ref iface) = self.interface {
            write!(f, " dev {}", iface)?;
        }
        if let Some(ifindex) = self.ifindex {
            write!(f, " ifindex {}", ifindex)?;
        }
        Ok(())
    }
}

/// Route manager for adding and removing routes
pub struct RouteManager {
    handle: net_route::Handle,
}

impl RouteManager {
    /// Create a new route manager
    ///
    /// Requires root or `CAP_NET_ADMIN`.
    pub async fn new() -> Result<Self> {
        let handle = net_route::Handle::new()
            .map_err(|e| Error::Route(format!("failed to create route handle: {}", e)))?;

        Ok(Self { handle })
    }

    fn to_net_route(route: &Route) -> Result<net_route::Route> {
        let mut net_route =
            net_route::Route::new(route.destination.addr(), route.destination.prefix_len());

        if let Some(gw) = route.gateway {
            net_route = net_route.with_gateway(gw);
        }

        if let Some(ifindex) = route.ifindex {
            net_route = net_route.with_ifindex(ifindex);
        } else if let Some(ref iface) = route.interface {
            net_route = net_route.with_ifindex(get_interface_index(iface)?);
        }

        Ok(net_route)
    }

    /// Add a route to the routing table
    ///
    /// An already-existing identical route is not an error; the insert is
    /// logged and skipped.
    pub async fn add(&self, route: &Route) -> Result<()> {
        let net_route = Self::to_net_route(route)?;

        match self.handle.add(&net_route).await {
            Ok(()) => {
                log::info!("Added route: {}", route);
                Ok(())
            }
            Err(e) => {
                let err_str = e.to_string();
                if err_str.contains("File exists") || err_str.contains("os error 17") {
                    log::debug!("Route already exists: {}", route);
                    Ok(())
                } else {
                    Err(Error::Route(format!("failed to add route: {}", e)))
                }
            }
        }
    }

    /// Remove a route from the routing table
    pub async fn delete(&self, route: &Route) -> Result<()> {
        let net_route = Self::to_net_route(route)?;

        self.handle
            .delete(&net_route)
            .await
            .map_err(|e| Error::Route(format!("failed to delete route: {}", e)))?;

        log::info!("Deleted route: {}", route);
        Ok(())
    }

    /// Find the current IPv4 default gateway
    ///
    /// Returns the gateway address and the interface index it sits on, or
    /// `None` when no default route with a gateway exists.
    pub async fn default_gateway(&self) -> Result<Option<(IpAddr, Option<u32>)>> {
        let routes = self
            .handle
            .list()
            .await
            .map_err(|e| Error::Route(format!("failed to list routes: {}", e)))?;

        for r in routes {
            if r.prefix == 0 && r.destination.is_ipv4() {
                if let Some(gw) = r.gateway {
                    return Ok(Some((gw, r.ifindex)));
                }
            }
        }

        Ok(None)
    }
}
