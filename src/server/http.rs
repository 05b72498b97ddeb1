use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;
use axum_server::Handle;

use crate::error::ApiResult;

pub async fn serve(
    listen_addr: Ipv4Addr,
    listen_port: u16,
    router: Router,
    handle: Handle,
) -> ApiResult<()> {
    let addr = SocketAddr::from((listen_addr, listen_port));

    log::info!("Opening listen port on {addr}");

    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
