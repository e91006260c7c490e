use rust_decimal_macros::dec;
use unifex::core::kernel::sign_hex;
use unifex::core::traits::{AccountInfo, FundsTransfer, MarketDataSource, OrderPlacer};
use unifex::exchanges::bybit::rest::endpoints;
use unifex::exchanges::bybit::{connector_with_rest, BybitConnector};
use unifex::testing::MockRest;
use unifex::{
    ExchangeConfig, ExchangeError, MarketKind, OrderRef, OrderSide, OrderStatus,
    PlaceOrderParams, Symbol, TimeInForce,
};

const SERVER_TIME: &str =
    r#"{"ret_code":0,"ret_msg":"OK","ext_code":"","time_now":"1000.000","result":{}}"#;

fn ok(result: &str) -> String {
    format!(
        r#"{{"ret_code":0,"ret_msg":"OK","ext_code":"","time_now":"1000.000","result":{}}}"#,
        result
    )
}

fn config() -> ExchangeConfig {
    ExchangeConfig::new("key".to_string(), "s3cr3t".to_string()).testnet(true)
}

fn connector(rest: &MockRest) -> BybitConnector<MockRest> {
    connector_with_rest(rest.clone(), &config())
}

fn symbol(base: &str) -> Symbol {
    Symbol::new(base, "USDT").unwrap()
}

mod market_data {
    use super::*;

    #[tokio::test]
    async fn test_spot_price_is_best_bid() {
        let rest = MockRest::new().respond(
            endpoints::SPOT_BOOK_TICKER,
            ok(r#"{"symbol":"BTCUSDT","bidPrice":"30000.5","bidQty":"1","askPrice":"30001","askQty":"2","time":1650000000000}"#),
        );
        let price = connector(&rest)
            .get_market_price(&symbol("BTC"), MarketKind::Spot)
            .await
            .unwrap();
        assert_eq!(price, dec!(30000.5));
        assert_eq!(
            rest.requests_to(endpoints::SPOT_BOOK_TICKER)[0].query,
            "symbol=BTCUSDT"
        );
    }

    #[tokio::test]
    async fn test_rejected_response_surfaces_code_and_message() {
        let rest = MockRest::new().respond(
            endpoints::SPOT_BOOK_TICKER,
            r#"{"ret_code":-100011,"ret_msg":"Invalid symbols!","result":null}"#,
        );
        let err = connector(&rest)
            .get_market_price(&symbol("BTC"), MarketKind::Spot)
            .await
            .unwrap_err();
        match err {
            ExchangeError::RemoteRejected { code, message, .. } => {
                assert_eq!(code, -100011);
                assert_eq!(message, "Invalid symbols!");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_perp_price_for_unlisted_symbol() {
        let rest = MockRest::new().respond(
            endpoints::PERP_TICKERS,
            ok(r#"[{"symbol":"ETHUSDT","mark_price":"2000","index_price":"2001"}]"#),
        );
        let err = connector(&rest)
            .get_market_price(&symbol("BTC"), MarketKind::Perp)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::SymbolNotFound(s) if s == "BTCUSDT"));
    }

    #[tokio::test]
    async fn test_price_filter_lookup() {
        let rest = MockRest::new().respond(
            endpoints::PERP_SYMBOLS,
            ok(r#"[{"name":"BTCUSDT","base_currency":"BTC","quote_currency":"USDT","price_filter":{"min_price":"0.5","max_price":"999999","tick_size":"0.5"}}]"#),
        );
        let connector = connector(&rest);

        let filter = connector.get_price_filter(&symbol("BTC")).await.unwrap();
        assert_eq!(filter.tick_size, dec!(0.5));
        assert_eq!(filter.max_price, dec!(999999));

        let missing = connector.get_price_filter(&symbol("DOGE")).await;
        assert!(matches!(missing, Err(ExchangeError::SymbolNotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_result_is_a_decode_error() {
        let rest = MockRest::new().respond(
            endpoints::PERP_SYMBOLS,
            ok(r#"[{"name":"BTCUSDT","price_filter":{"max_price":"999999","tick_size":"half"}}]"#),
        );
        let err = connector(&rest)
            .get_price_filter(&symbol("BTC"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Decode { .. }));
    }
}

mod signing {
    use super::*;

    #[tokio::test]
    async fn test_signed_request_uses_guarded_server_time() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(endpoints::SPOT_BALANCE, ok(r#"{"balances":[]}"#));
        connector(&rest)
            .get_all_balances(MarketKind::Spot)
            .await
            .unwrap();

        let request = &rest.requests_to(endpoints::SPOT_BALANCE)[0];
        let canonical = "api_key=key&timestamp=999900";
        assert_eq!(
            request.query,
            format!("{}&sign={}", canonical, sign_hex("s3cr3t", canonical).unwrap())
        );
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_server_time_failure_sends_nothing() {
        let rest = MockRest::new()
            .fail(endpoints::SERVER_TIME, "connection reset")
            .respond(endpoints::SPOT_BALANCE, ok(r#"{"balances":[]}"#));
        let err = connector(&rest)
            .get_all_balances(MarketKind::Spot)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Signing(_)));
        assert!(rest.requests_to(endpoints::SPOT_BALANCE).is_empty());
    }

    #[tokio::test]
    async fn test_private_call_without_credentials() {
        let rest = MockRest::new().respond(endpoints::SERVER_TIME, SERVER_TIME);
        let connector = connector_with_rest(rest.clone(), &ExchangeConfig::read_only());
        let err = connector
            .get_all_balances(MarketKind::Perp)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));
        assert!(rest.requests().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_signs_the_json_body() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(endpoints::WITHDRAW, ok(r#"{"id":"9876"}"#));
        let id = connector(&rest)
            .withdraw("usdt", dec!(25.50), "TXYZ", "TRC20")
            .await
            .unwrap();
        assert_eq!(id, "9876");

        let request = &rest.requests_to(endpoints::WITHDRAW)[0];
        assert!(request.query.is_empty());
        let body: serde_json::Value =
            serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["coin"], "USDT");
        assert_eq!(body["amount"], "25.50");
        assert_eq!(body["timestamp"], "999900");
        let canonical =
            "address=TXYZ&amount=25.50&api_key=key&chain=TRC20&coin=USDT&timestamp=999900";
        assert_eq!(body["sign"], sign_hex("s3cr3t", canonical).unwrap().as_str());
    }

    #[tokio::test]
    async fn test_withdraw_rejects_non_positive_amount() {
        let rest = MockRest::new();
        let err = connector(&rest)
            .withdraw("USDT", dec!(0), "TXYZ", "TRC20")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameters(_)));
        assert!(rest.requests().is_empty());
    }
}

mod account {
    use super::*;

    fn account_rest() -> MockRest {
        MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(
                endpoints::SPOT_BALANCE,
                ok(r#"{"balances":[
                    {"coin":"BTC","coinId":"BTC","total":"0.5","free":"0.4","locked":"0.1"},
                    {"coin":"USDT","coinId":"USDT","total":"100","free":"100","locked":"0"},
                    {"coin":"ETH","coinId":"ETH","total":"0","free":"0","locked":"0"}
                ]}"#),
            )
            .respond(
                endpoints::PERP_BALANCE,
                ok(r#"{
                    "USDT":{"equity":50,"available_balance":40,"used_margin":10,"wallet_balance":50,"realised_pnl":0,"unrealised_pnl":0},
                    "SOL":{"equity":2,"available_balance":2,"used_margin":0,"wallet_balance":2,"realised_pnl":0,"unrealised_pnl":0}
                }"#),
            )
            .respond(
                endpoints::SPOT_BOOK_TICKER,
                ok(r#"{"symbol":"BTCUSDT","bidPrice":"30000","askPrice":"30001"}"#),
            )
            .respond(
                endpoints::PERP_TICKERS,
                ok(r#"[{"symbol":"BTCUSDT","mark_price":"30010"}]"#),
            )
    }

    #[tokio::test]
    async fn test_total_value_lists_unpriced_balances() {
        let rest = account_rest();
        let valuation = connector(&rest).get_total_account_usd_value().await.unwrap();

        // 0.5 BTC at the spot bid, plus 100 spot USDT and 50 derivative USDT
        assert_eq!(valuation.total_usd, dec!(15150));
        assert!(!valuation.is_complete());
        assert_eq!(valuation.unpriced.len(), 1);
        assert_eq!(valuation.unpriced[0].coin, "SOL");
        assert_eq!(valuation.unpriced[0].market, MarketKind::Perp);
        assert_eq!(valuation.unpriced[0].amount, dec!(2));
    }

    #[tokio::test]
    async fn test_total_value_fails_when_balances_are_unavailable() {
        let rest = account_rest().respond(
            endpoints::PERP_BALANCE,
            r#"{"ret_code":10004,"ret_msg":"error sign!","result":null}"#,
        );
        let err = connector(&rest)
            .get_total_account_usd_value()
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::RemoteRejected { code: 10004, .. }));
    }

    #[tokio::test]
    async fn test_balance_endpoint_transport_failure() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .fail(endpoints::SPOT_BALANCE, "connection reset");
        let err = connector(&rest)
            .get_all_balances(MarketKind::Spot)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ExchangeError::Transport { endpoint, .. } if endpoint == endpoints::SPOT_BALANCE)
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_listed_as_unpriced() {
        let rest = account_rest()
            .respond(
                endpoints::SPOT_BALANCE,
                ok(r#"{"balances":[
                    {"coin":"BTC","coinId":"BTC","total":"79228162514264337593543950335","free":"0","locked":"0"},
                    {"coin":"USDT","coinId":"USDT","total":"79228162514264337593543950335","free":"0","locked":"0"}
                ]}"#),
            )
            .respond(
                endpoints::PERP_BALANCE,
                ok(r#"{"USDT":{"equity":50,"available_balance":50,"used_margin":0,"wallet_balance":50,"realised_pnl":0,"unrealised_pnl":0}}"#),
            );
        let valuation = connector(&rest).get_total_account_usd_value().await.unwrap();

        assert_eq!(valuation.total_usd, rust_decimal::Decimal::MAX);
        let unpriced: Vec<_> = valuation
            .unpriced
            .iter()
            .map(|u| (u.coin.as_str(), u.market))
            .collect();
        assert_eq!(unpriced, [("BTC", MarketKind::Spot), ("USDT", MarketKind::Perp)]);
        assert!(valuation.unpriced[0].reason.contains("out of range"));
    }

    #[tokio::test]
    async fn test_missing_coin_is_a_zero_balance() {
        let rest = account_rest();
        let connector = connector(&rest);

        let btc = connector.get_balance("btc", MarketKind::Spot).await.unwrap();
        assert_eq!(btc.free, dec!(0.4));

        let doge = connector.get_balance("DOGE", MarketKind::Spot).await.unwrap();
        assert_eq!(doge.coin, "DOGE");
        assert!(doge.total.is_zero());
    }

    #[tokio::test]
    async fn test_perp_balances_are_sorted_with_locked_margin() {
        let rest = account_rest();
        let balances = connector(&rest)
            .get_all_balances(MarketKind::Perp)
            .await
            .unwrap();
        let coins: Vec<_> = balances.iter().map(|b| b.coin.as_str()).collect();
        assert_eq!(coins, ["SOL", "USDT"]);
        assert_eq!(balances[1].locked, dec!(10));
    }

    #[tokio::test]
    async fn test_position_snapshot() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(
                endpoints::PERP_POSITION,
                ok(r#"{"symbol":"BTCUSDT","side":"Sell","size":"0.3","entry_price":"30500","liq_price":"0","realised_pnl":"1.5","unrealised_pnl":"-2.25"}"#),
            );
        let position = connector(&rest).get_position(&symbol("BTC")).await.unwrap();
        assert_eq!(position.side, unifex::PositionSide::Short);
        assert_eq!(position.size, dec!(0.3));
        assert_eq!(position.unrealized_pnl, dec!(-2.25));
        assert_eq!(position.liquidation_price, None);
        assert!(rest.requests_to(endpoints::PERP_POSITION)[0]
            .query
            .starts_with("api_key=key&symbol=BTCUSDT&timestamp=999900&sign="));
    }

    #[tokio::test]
    async fn test_deposit_address_by_network() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(
                endpoints::DEPOSIT_ADDRESS,
                ok(r#"{"coin":"USDT","chains":[
                    {"chain_type":"ERC20","address_deposit":"0xabc","tag_deposit":"","chain":"ETH"},
                    {"chain_type":"TRC20","address_deposit":"TXYZ","tag_deposit":"","chain":"TRX"}
                ]}"#),
            );
        let connector = connector(&rest);

        let first = connector.get_deposit_address("usdt", "").await.unwrap();
        assert_eq!(first.address, "0xabc");

        let tron = connector.get_deposit_address("usdt", "trc20").await.unwrap();
        assert_eq!(tron.address, "TXYZ");
        assert_eq!(tron.tag, None);

        let err = connector.get_deposit_address("usdt", "SOL").await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameters(_)));
    }
}

mod trading {
    use super::*;

    #[tokio::test]
    async fn test_invalid_order_is_not_sent() {
        let rest = MockRest::new();
        let params =
            PlaceOrderParams::market(symbol("BTC"), MarketKind::Spot, OrderSide::Buy, dec!(0));
        let err = connector(&rest).place_order(params).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameters(_)));
        assert!(rest.requests().is_empty());
    }

    #[tokio::test]
    async fn test_spot_post_only_becomes_limit_maker() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(
                endpoints::SPOT_ORDER,
                ok(r#"{"orderId":"1001","orderLinkId":"mine-1","symbol":"BTCUSDT","price":"29000.10","origQty":"0.010","executedQty":"0","type":"LIMIT_MAKER","side":"BUY","status":"NEW","timeInForce":"GTC","transactTime":"1650000000000"}"#),
            );
        let params = PlaceOrderParams::limit(
            symbol("BTC"),
            MarketKind::Spot,
            OrderSide::Buy,
            dec!(29000.10),
            dec!(0.010),
        )
        .with_time_in_force(TimeInForce::PostOnly)
        .with_client_id("mine-1");

        let order = connector(&rest).place_order(params).await.unwrap();
        assert_eq!(order.id, "1001");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.client_id.as_deref(), Some("mine-1"));

        let query = &rest.requests_to(endpoints::SPOT_ORDER)[0].query;
        assert!(query.contains("type=LIMIT_MAKER"));
        assert!(query.contains("price=29000.10"));
        assert!(query.contains("qty=0.010"));
        assert!(!query.contains("timeInForce"));
    }

    #[tokio::test]
    async fn test_perp_order_lookup_not_found() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(
                endpoints::PERP_ORDER_LIST,
                ok(r#"{"data":[{"order_id":"a-1","order_link_id":"","symbol":"BTCUSDT","side":"Sell","order_type":"Limit","price":"31000","qty":"2","time_in_force":"GoodTillCancel","order_status":"PartiallyFilled","leaves_qty":"1","cum_exec_qty":"1","created_at":"2022-04-15T08:00:00Z"}]}"#),
            );
        let connector = connector(&rest);
        let order_ref = |id: &str| OrderRef {
            order_id: id.to_string(),
            symbol: symbol("BTC"),
            market: MarketKind::Perp,
        };

        let found = connector.get_order(&order_ref("a-1")).await.unwrap();
        assert_eq!(found.status, OrderStatus::PartiallyFilled);
        assert_eq!(found.remaining_size, dec!(1));

        let err = connector.get_order(&order_ref("b-2")).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_cancel_uses_method_per_market() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, SERVER_TIME)
            .respond(endpoints::SPOT_ORDER, ok("null"))
            .respond(endpoints::PERP_ORDER_CANCEL, ok(r#"{"order_id":"a-1"}"#));
        let connector = connector(&rest);

        let spot = OrderRef {
            order_id: "1001".to_string(),
            symbol: symbol("BTC"),
            market: MarketKind::Spot,
        };
        assert!(connector.cancel_order(&spot).await.unwrap());
        assert_eq!(
            rest.requests_to(endpoints::SPOT_ORDER)[0].method,
            reqwest::Method::DELETE
        );

        let perp = OrderRef {
            market: MarketKind::Perp,
            order_id: "a-1".to_string(),
            ..spot
        };
        assert!(connector.cancel_order(&perp).await.unwrap());
        let query = &rest.requests_to(endpoints::PERP_ORDER_CANCEL)[0].query;
        assert!(query.starts_with("api_key=key&order_id=a-1&symbol=BTCUSDT&timestamp=999900"));
    }
}
