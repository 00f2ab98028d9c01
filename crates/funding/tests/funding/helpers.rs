use async_trait::async_trait;
use funding::{
    build_reqwest_client, DescriptionHash, FundingError, FundingSource, InvoiceResponse,
    LnPaySettings, LnPayWallet, LndRestSettings, LndRestWallet, LntxbotSettings, LntxbotWallet,
    PaidInvoiceStream, PaymentResponse, PaymentStatus, SettlementMode, SettlementSender,
};
use futures::StreamExt;
use mockall::mock;
use reqwest_middleware::ClientWithMiddleware;
use std::{sync::Once, time::Duration};
use wiremock::MockServer;

/// Mainnet invoice for 10 sats
pub const BOLT11: &str = "lnbc100n1p5fvqfdsp586d9yz88deyfxm2mxgh39n39lezmpnkcv0a35uh38fvnjzlaxdzqpp59nwc8zac6psv09wysxvulgwj0t23jh3g5r4l5qzgpdsnel94w5zshp5mndu23huxkp6jgynf8agfjfaypgfjs2z8glq8fs9zqjfpnf34jnqcqpjrzjqgc7enr9zr4ju8yhezsep4h2p9ncf2nuxkp423pq2k4v3vsx2nunyz60tsqqj9qqqqqqqqqpqqqqqysqjq9qxpqysgqala28sswmp68uc9axqt893n48lzzt7l3uzkzjzlmlzurczpc647sxn4vrt4hvm30v5vv2ysvxhxeej78j903emrrjh02xdrl6z9alzqqns0w5s";
pub const BOLT11_PAYMENT_HASH: &str =
    "2cdd838bb8d060c795c48199cfa1d27ad5195e28a0ebfa00480b613cfcb57505";

pub const LNPAY_API_KEY: &str = "sak_test";
pub const LNPAY_WALLET_KEY: &str = "waka_test";
pub const LNTXBOT_KEY: &str = "bG50eGJvdDp0ZXN0";
pub const LND_MACAROON: &str = "0201036c6e64";

static INIT_LOGGER: Once = Once::new();

pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// How long a stalled provider takes to answer, well past [`impatient_client`]
pub const STALL: Duration = Duration::from_secs(2);

pub fn test_client() -> ClientWithMiddleware {
    build_reqwest_client(Duration::from_secs(5)).unwrap()
}

pub fn impatient_client() -> ClientWithMiddleware {
    build_reqwest_client(Duration::from_millis(200)).unwrap()
}

pub fn lnpay_wallet(server: &MockServer) -> LnPayWallet {
    lnpay_wallet_with(server, test_client())
}

pub fn lnpay_wallet_with(server: &MockServer, client: ClientWithMiddleware) -> LnPayWallet {
    LnPayWallet::new(
        client,
        &LnPaySettings {
            api_endpoint: server.uri(),
            api_key: Some(LNPAY_API_KEY.to_string()),
            wallet_key: Some(LNPAY_WALLET_KEY.to_string()),
        },
    )
}

pub fn lntxbot_wallet(server: &MockServer) -> LntxbotWallet {
    lntxbot_wallet_with(server, test_client())
}

pub fn lntxbot_wallet_with(server: &MockServer, client: ClientWithMiddleware) -> LntxbotWallet {
    LntxbotWallet::new(
        client,
        &LntxbotSettings {
            api_endpoint: server.uri(),
            key: Some(LNTXBOT_KEY.to_string()),
        },
        true,
    )
}

pub fn lnd_rest_wallet(server: &MockServer) -> LndRestWallet {
    lnd_rest_wallet_with(server, test_client())
}

pub fn lnd_rest_wallet_with(server: &MockServer, client: ClientWithMiddleware) -> LndRestWallet {
    LndRestWallet::new(
        client,
        &LndRestSettings {
            endpoint: server.uri(),
            macaroon: Some(LND_MACAROON.to_string()),
            tls_cert_path: None,
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

/// Next item of a paid invoices stream, `None` when nothing arrives in time
pub async fn next_paid(stream: &mut PaidInvoiceStream, wait: Duration) -> Option<String> {
    tokio::time::timeout(wait, stream.next()).await.ok().flatten()
}

mock! {
    pub FundingSource { }

    #[async_trait]
    impl FundingSource for FundingSource {
        fn name(&self) -> &'static str;
        fn settlement_mode(&self) -> SettlementMode;
        fn settlement_sender(&self) -> SettlementSender;
        async fn create_invoice(
            &self,
            amount: u64,
            memo: Option<String>,
            description_hash: Option<DescriptionHash>,
        ) -> InvoiceResponse;
        async fn pay_invoice(&self, bolt11: &str) -> PaymentResponse;
        async fn get_invoice_status(&self, checking_id: &str) -> PaymentStatus;
        async fn get_payment_status(&self, checking_id: &str) -> PaymentStatus;
        async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, FundingError>;
    }
}
